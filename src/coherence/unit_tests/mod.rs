#[cfg(test)]
mod cache_tests;
