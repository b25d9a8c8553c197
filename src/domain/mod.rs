// Domain layer: request/response models and ports (interfaces). No web or ML framework types here.

pub mod model;
pub mod ports;
