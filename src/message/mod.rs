//! Request and response messages exchanged with the controller

pub mod read_registers;
