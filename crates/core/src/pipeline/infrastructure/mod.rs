pub mod async_executor;
