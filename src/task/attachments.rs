//! Seeded attachment payloads.
//!
//! Every generator draws from a pseudo-random stream keyed on the task seed,
//! so one seed always yields byte-identical payloads.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use super::Attachment;

const PRODUCTS: [&str; 5] = [
    "Product A",
    "Product B",
    "Product C",
    "Product D",
    "Product E",
];
const REGIONS: [&str; 4] = ["North", "South", "East", "West"];
const SALES_ROWS: usize = 10;

/// Ground truth used by templates whose checks do not depend on attachment data.
pub const DEFAULT_RESULT: f64 = 12345.67;

/// Deterministic RNG for a seed (and a purpose tag, so streams don't overlap).
pub(crate) fn seeded_rng(seed: &str, purpose: &str) -> StdRng {
    let digest = Sha256::digest(format!("{}:{}", purpose, seed).as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    StdRng::from_seed(bytes)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn data_uri(mime: &str, content: &str) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(content.as_bytes()))
}

#[derive(Debug, Clone, PartialEq)]
struct SaleRow {
    product: &'static str,
    region: &'static str,
    sales: f64,
}

fn sales_rows(seed: &str) -> Vec<SaleRow> {
    let mut rng = seeded_rng(seed, "sales");
    (0..SALES_ROWS)
        .map(|_| SaleRow {
            product: PRODUCTS.choose(&mut rng).copied().unwrap_or(PRODUCTS[0]),
            region: REGIONS.choose(&mut rng).copied().unwrap_or(REGIONS[0]),
            sales: round2(rng.gen_range(100.0..1000.0)),
        })
        .collect()
}

pub(crate) fn sales_csv(seed: &str) -> String {
    let mut lines = vec!["product,region,sales".to_string()];
    for row in sales_rows(seed) {
        lines.push(format!("{},{},{:.2}", row.product, row.region, row.sales));
    }
    lines.join("\n")
}

/// Sum of the `sales` column of `data.csv` for this seed.
pub(crate) fn sales_total(seed: &str) -> f64 {
    round2(sales_rows(seed).iter().map(|row| row.sales).sum())
}

pub(crate) fn sales_attachments(seed: &str) -> Vec<Attachment> {
    vec![Attachment {
        name: "data.csv".to_string(),
        url: data_uri("text/csv", &sales_csv(seed)),
    }]
}

pub(crate) fn markdown_source(seed: &str) -> String {
    format!(
        "# Sample Document {seed}\n\n\
         This is a sample markdown document with seed {seed}.\n\n\
         ## Features\n\n\
         - Code highlighting\n\
         - **Bold text**\n\
         - *Italic text*\n\n\
         ## Code Example\n\n\
         ```python\n\
         def hello():\n    print(\"Hello, World!\")\n\
         ```\n\n\
         ## Conclusion\n\n\
         This is generated content for testing.\n"
    )
}

pub(crate) fn markdown_attachments(seed: &str) -> Vec<Attachment> {
    vec![Attachment {
        name: "input.md".to_string(),
        url: data_uri("text/markdown", &markdown_source(seed)),
    }]
}

pub(crate) fn rates_json(seed: &str) -> String {
    let mut rng = seeded_rng(seed, "rates");
    let eur = (rng.gen_range(0.8..0.9) * 10_000.0_f64).round() / 10_000.0;
    let gbp = (rng.gen_range(0.7..0.8) * 10_000.0_f64).round() / 10_000.0;
    let jpy = round2(rng.gen_range(110.0..130.0));
    serde_json::json!({
        "USD": 1.0,
        "EUR": eur,
        "GBP": gbp,
        "JPY": jpy,
    })
    .to_string()
}

pub(crate) fn rates_attachments(seed: &str) -> Vec<Attachment> {
    vec![Attachment {
        name: "rates.json".to_string(),
        url: data_uri("application/json", &rates_json(seed)),
    }]
}

pub(crate) fn no_attachments(_seed: &str) -> Vec<Attachment> {
    Vec::new()
}

pub(crate) fn default_result(_seed: &str) -> f64 {
    DEFAULT_RESULT
}
