pub mod config;
pub mod inspect;
pub mod open;

use serde::Serialize;

/// Print `value` as JSON, or fall back to `text` for human-readable output
pub(crate) fn print_output<T: Serialize>(value: &T, json: bool, text: impl FnOnce(&T) -> String) {
    if json {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error serializing output: {}", e),
        }
    } else {
        println!("{}", text(value));
    }
}
