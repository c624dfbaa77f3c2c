//! Fetch a URL with the blocking HTTP client.
//!
//! Run with: `cargo run --example http_get -- http://example.com/`

use std::error::Error;
use std::time::Duration;

use wsgate::HttpClient;

fn main() -> Result<(), Box<dyn Error>> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://example.com/".to_string());

    let client = HttpClient::new().with_timeout(Some(Duration::from_secs(10)));
    let response = client.get(&url)?;

    println!("{} {}", response.status, response.reason);
    for (name, value) in response.headers.iter() {
        println!("{name}: {value}");
    }
    println!();
    println!("{}", response.text()?);
    Ok(())
}
