pub mod chat;
pub mod doctor;
pub mod history;
pub mod onboard;
pub mod serve;
