pub mod bus;
pub mod health;
pub mod presence;
pub mod session;
pub mod validation;
