mod test_error_handling;
mod test_heartbeat;
mod test_normal;
mod test_timeout;
