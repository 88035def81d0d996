pub mod directory;
pub mod gallery;
pub mod model;
pub mod optimistic;
pub mod snowflake;
