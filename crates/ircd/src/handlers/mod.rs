pub mod channels;
pub mod messages;
pub mod misc;
pub mod registration;
