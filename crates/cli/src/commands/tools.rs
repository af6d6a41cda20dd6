//! `stepwise tools`: List built-in tools.

use super::CommandResult;

pub async fn run() -> CommandResult {
    let registry = stepwise_tools::default_registry();
    println!("Built-in tools:");
    println!();
    println!("{}", registry.catalog());
    Ok(0)
}
