pub mod extract;
pub mod peaks;
pub mod table;
