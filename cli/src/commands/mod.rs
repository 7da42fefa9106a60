pub mod health;
pub mod image;

pub use health::health_check;
pub use image::{handle_image_command, ImageCommands};
