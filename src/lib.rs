pub mod llm;
pub mod services;
pub mod state;

#[cfg(test)]
pub(crate) mod test_helpers;
