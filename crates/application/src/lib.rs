#![forbid(unsafe_code)]

pub mod classifier_service;
mod state;

pub use classifier_service::{ClassifierSettings, PacketClassifier};
