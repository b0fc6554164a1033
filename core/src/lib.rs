pub mod db;
pub mod error;
pub mod glucose;
pub mod models;
pub mod nutrition;
pub mod openfoodfacts;
pub mod service;
