pub mod health;
pub mod rbmq;
pub mod redis;
pub mod remote;
