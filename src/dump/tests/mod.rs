pub mod helpers;
mod tests_add_get;
mod tests_delete;
mod tests_shutdown;
mod tests_update;
