pub mod action;
pub mod completion;
pub mod health;
pub mod notification;
pub mod remote;
pub mod result;
pub mod retry;
pub mod state;
