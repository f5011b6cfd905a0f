pub mod conversations;
pub mod lessons;
pub mod users;
