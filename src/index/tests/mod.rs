pub mod helpers;
mod tests_infinite;
mod tests_lifecycle;
