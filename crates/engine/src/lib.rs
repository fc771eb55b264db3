pub mod cell;
pub mod grid;
pub mod header;
pub mod table;
