pub mod auto_message_dispatcher;
