// Domain layer: request/response models and ports (transport, sleeper).

pub mod model;
pub mod ports;
