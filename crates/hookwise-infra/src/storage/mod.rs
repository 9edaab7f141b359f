pub mod memory;

pub use memory::InMemoryWebhookStorage;
