//! Control policy: pure decision logic, no I/O.

pub mod dosing;
