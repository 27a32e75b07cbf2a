pub mod channels;
pub mod commands;
pub mod connection;
pub mod dispatch;
pub mod modbus;
pub mod output;
pub mod poll;
pub mod registers;
pub mod sync;
