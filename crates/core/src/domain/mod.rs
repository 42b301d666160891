pub mod agent;
pub mod safety;
pub mod session;
pub mod tool;
pub mod turn;
