#![allow(dead_code)]

pub mod builders;
pub mod mock_connector;
pub mod strategies;

pub use builders::*;
pub use mock_connector::*;
pub use strategies::*;
