//! `cortex history`: Saved chat management.

use cortex_config::AppConfig;
use cortex_core::history::{ChatName, ChatStore};
use cortex_memory::FileChatStore;

fn store() -> Result<FileChatStore, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    Ok(FileChatStore::new(config.history.dir))
}

pub async fn list() -> Result<(), Box<dyn std::error::Error>> {
    let store = store()?;
    let names = store.list().await?;

    if names.is_empty() {
        println!("No saved chats.");
        return Ok(());
    }

    println!("Saved chats");
    println!("===========");
    for name in names {
        match store.load(&name).await {
            Ok(history) => println!(
                "  {name:<32} {:>4} messages  {}",
                history.messages.len(),
                history.saved_at.format("%Y-%m-%d %H:%M")
            ),
            Err(e) => println!("  {name:<32} (unreadable: {e})"),
        }
    }

    Ok(())
}

pub async fn show(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let name = ChatName::parse(name)?;
    let history = store()?.load(&name).await?;

    println!("{} - saved {}\n", history.name, history.saved_at.format("%Y-%m-%d %H:%M"));
    for message in &history.messages {
        println!("[{}]", message.role.as_str());
        println!("{}\n", message.content);
    }

    Ok(())
}

pub async fn delete(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let name = ChatName::parse(name)?;
    if store()?.delete(&name).await? {
        println!("Deleted chat '{name}'.");
    } else {
        println!("No chat named '{name}'.");
    }

    Ok(())
}
