pub mod audio;
pub mod bluetooth;
pub mod logging;
pub mod native;

#[cfg(windows)]
pub mod platform;

#[cfg(test)]
pub mod fakes;
