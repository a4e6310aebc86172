//! Statically registered task templates.
//!
//! Placeholders `{seed}` and `{result}` are substituted at render time.

use super::attachments::{
    default_result, markdown_attachments, no_attachments, rates_attachments, sales_attachments,
    sales_total,
};
use super::Attachment;

/// A follow-up variant issued in round 2 against the same task id.
pub struct Round2Variant {
    pub brief: &'static str,
    pub attachments: Option<fn(&str) -> Vec<Attachment>>,
    pub checks: &'static [&'static str],
}

/// An immutable task template.
pub struct TaskTemplate {
    pub id: &'static str,
    pub brief: &'static str,
    pub attachments: fn(&str) -> Vec<Attachment>,
    /// Numeric ground truth the finished page must reproduce.
    pub result: fn(&str) -> f64,
    pub checks: &'static [&'static str],
    pub round2: &'static [Round2Variant],
}

pub static TEMPLATES: [TaskTemplate; 3] = [
    TaskTemplate {
        id: "sum-of-sales",
        brief: "Publish a single-page site that fetches data.csv from attachments, sums its sales column, sets the title to \"Sales Summary {seed}\", displays the total inside #total-sales, and loads Bootstrap 5 from jsdelivr.",
        attachments: sales_attachments,
        result: sales_total,
        checks: &[
            "js: document.title === `Sales Summary {seed}`",
            r#"js: !!document.querySelector("link[href*='bootstrap']")"#,
            r##"js: Math.abs(parseFloat(document.querySelector("#total-sales").textContent) - {result}) < 0.01"##,
        ],
        round2: &[
            Round2Variant {
                brief: "Add a Bootstrap table #product-sales that lists each product with its total sales and keeps #total-sales accurate after render.",
                attachments: None,
                checks: &[
                    r##"js: document.querySelectorAll("#product-sales tbody tr").length >= 1"##,
                    r##"js: (() => { const rows = [...document.querySelectorAll("#product-sales tbody tr td:last-child")]; const sum = rows.reduce((acc, cell) => acc + parseFloat(cell.textContent), 0); return Math.abs(sum - {result}) < 0.01; })()"##,
                ],
            },
            Round2Variant {
                brief: "Introduce a currency select #currency-picker that converts the computed total using rates.json from attachments and mirrors the active currency inside #total-currency.",
                attachments: Some(rates_attachments),
                checks: &[
                    r##"js: !!document.querySelector("#currency-picker option[value='USD']")"##,
                    r##"js: !!document.querySelector("#total-currency")"##,
                ],
            },
            Round2Variant {
                brief: "Allow filtering by region via #region-filter, update #total-sales with the filtered sum, and set data-region on that element to the active choice.",
                attachments: None,
                checks: &[
                    r##"js: document.querySelector("#region-filter").tagName === "SELECT""##,
                    r##"js: document.querySelector("#total-sales").dataset.region !== undefined"##,
                ],
            },
        ],
    },
    TaskTemplate {
        id: "markdown-to-html",
        brief: "Publish a static page that converts input.md from attachments to HTML with marked, renders it inside #markdown-output, and loads highlight.js for code blocks.",
        attachments: markdown_attachments,
        result: default_result,
        checks: &[
            r#"js: !!document.querySelector("script[src*='marked']")"#,
            r#"js: !!document.querySelector("script[src*='highlight.js']")"#,
            r##"js: document.querySelector("#markdown-output").innerHTML.includes("<h")"##,
        ],
        round2: &[
            Round2Variant {
                brief: "Add tabs #markdown-tabs that switch between rendered HTML in #markdown-output and the original Markdown in #markdown-source while keeping content in sync.",
                attachments: None,
                checks: &[
                    r##"js: document.querySelectorAll("#markdown-tabs button").length >= 2"##,
                    r##"js: document.querySelector("#markdown-source").textContent.trim().length > 0"##,
                ],
            },
            Round2Variant {
                brief: "Support loading Markdown from a ?url= parameter when present and fall back to the attachment otherwise, showing the active source in #markdown-source-label.",
                attachments: None,
                checks: &[
                    r##"js: document.querySelector("#markdown-source-label").textContent.length > 0"##,
                    r#"js: !!document.querySelector("script").textContent.includes("fetch(")"#,
                ],
            },
            Round2Variant {
                brief: "Display a live word count badge #markdown-word-count that updates after every render and formats numbers with Intl.NumberFormat.",
                attachments: None,
                checks: &[
                    r##"js: document.querySelector("#markdown-word-count").textContent.includes(",")"##,
                    r#"js: !!document.querySelector("script").textContent.includes("Intl.NumberFormat")"#,
                ],
            },
        ],
    },
    TaskTemplate {
        id: "github-user-created",
        brief: "Publish a Bootstrap page with form id=\"github-user-{seed}\" that fetches a GitHub username, optionally uses ?token=, and displays the account creation date in YYYY-MM-DD UTC inside #github-created-at.",
        attachments: no_attachments,
        result: default_result,
        checks: &[
            r##"js: document.querySelector("#github-user-{seed}").tagName === "FORM""##,
            r##"js: document.querySelector("#github-created-at").textContent.includes("20")"##,
            r#"js: !!document.querySelector("script").textContent.includes("https://api.github.com/users/")"#,
        ],
        round2: &[
            Round2Variant {
                brief: "Show an aria-live alert #github-status that reports when a lookup starts, succeeds, or fails.",
                attachments: None,
                checks: &[
                    r##"js: document.querySelector("#github-status").getAttribute("aria-live") === "polite""##,
                    r#"js: !!document.querySelector("script").textContent.includes("github-status")"#,
                ],
            },
            Round2Variant {
                brief: "Display the account age in whole years inside #github-account-age alongside the creation date.",
                attachments: None,
                checks: &[
                    r##"js: parseInt(document.querySelector("#github-account-age").textContent, 10) >= 0"##,
                    r##"js: document.querySelector("#github-account-age").textContent.toLowerCase().includes("years")"##,
                ],
            },
            Round2Variant {
                brief: "Cache the last successful lookup in localStorage under \"github-user-{seed}\" and repopulate the form on load.",
                attachments: None,
                checks: &[
                    r#"js: !!document.querySelector("script").textContent.includes('localStorage.setItem("github-user-{seed}"')"#,
                    r#"js: !!document.querySelector("script").textContent.includes('localStorage.getItem("github-user-{seed}"')"#,
                ],
            },
        ],
    },
];

/// Look up a template by id.
pub fn find_template(id: &str) -> Option<&'static TaskTemplate> {
    TEMPLATES.iter().find(|t| t.id == id)
}
