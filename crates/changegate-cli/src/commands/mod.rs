pub mod db;
pub mod diff;
pub mod sandbox;
