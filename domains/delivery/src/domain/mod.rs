pub mod entities;
pub mod outcome;
pub mod state;
