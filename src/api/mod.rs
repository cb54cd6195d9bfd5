// Serializable views of a recorded graph.

pub mod dto;
