pub mod enqueue_due_messages;
pub mod generate_auto_messages;
