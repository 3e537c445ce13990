pub mod constants;
pub mod map_stuffs;
pub mod misc;
pub mod palette;
pub mod simple_calculs;
