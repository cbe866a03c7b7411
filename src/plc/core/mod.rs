//! Pure PLC domain: language, memory, interpreter, register map.

pub mod ast;
pub mod builtins;
pub mod codec;
pub mod config;
pub mod default_controller;
pub mod interpreter;
pub mod lexer;
pub mod memory;
pub mod parser;
pub mod register_map;
pub mod value;
