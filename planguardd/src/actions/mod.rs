// ABOUTME: groups the per-capability executors used by the dispatcher.
// ABOUTME: exec and files run for real; planned only describes.

pub mod exec;
pub mod files;
pub mod planned;
