//! Deterministic task generation.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use sha2::{Digest, Sha256};

use super::attachments::seeded_rng;
use super::templates::{find_template, TaskTemplate, TEMPLATES};
use super::{Attachment, Check, Task};
use crate::error::GradeError;

const SEED_LEN: usize = 8;
const TASK_HASH_LEN: usize = 5;

/// Hourly bucket used for seeding (`YYYY-MM-DD-HH`, UTC).
pub fn time_bucket(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d-%H").to_string()
}

/// Seed for an identity within the bucket containing `now`.
pub fn derive_seed(identity: &str, now: DateTime<Utc>) -> String {
    let digest = Sha256::digest(format!("{}-{}", identity, time_bucket(now)).as_bytes());
    hex::encode(digest)[..SEED_LEN].to_string()
}

/// Content-addressed task id: `{template_id}-{hash(brief, attachments)}`.
pub fn compute_task_id(template_id: &str, brief: &str, attachments: &[Attachment]) -> String {
    // serde_json maps are key-sorted, so this encoding is stable.
    let canonical = serde_json::json!({
        "attachments": attachments,
        "brief": brief,
    })
    .to_string();
    let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
    format!("{}-{}", template_id, &digest[..TASK_HASH_LEN])
}

/// Template id encoded in a task id (everything before the last `-`).
pub fn template_id_of(task_id: &str) -> &str {
    task_id
        .rsplit_once('-')
        .map(|(prefix, _)| prefix)
        .unwrap_or(task_id)
}

fn format_result(result: f64) -> String {
    format!("{:.2}", result)
}

fn render(text: &str, seed: &str, result: &str) -> String {
    text.replace("{seed}", seed).replace("{result}", result)
}

fn render_checks(checks: &[&str], seed: &str, result: &str) -> Vec<Check> {
    checks
        .iter()
        .map(|raw| Check::parse(&render(raw, seed, result)))
        .collect()
}

/// Render the round-1 task of `template` for an already derived seed.
pub fn render_initial(template: &TaskTemplate, seed: &str) -> Task {
    let result = format_result((template.result)(seed));
    let brief = render(template.brief, seed, &result);
    let attachments = (template.attachments)(seed);
    let checks = render_checks(template.checks, seed, &result);
    let task_id = compute_task_id(template.id, &brief, &attachments);

    Task {
        template_id: template.id.to_string(),
        task_id,
        round: 1,
        seed: seed.to_string(),
        brief,
        checks,
        attachments,
    }
}

/// Generate a task for `identity` using the current hour bucket.
pub fn generate(
    identity: &str,
    template_id: Option<&str>,
    round: u32,
    existing_task_id: Option<&str>,
) -> Result<Task, GradeError> {
    generate_at(identity, template_id, round, existing_task_id, Utc::now())
}

/// Generate a task for the hour bucket containing `now`.
pub fn generate_at(
    identity: &str,
    template_id: Option<&str>,
    round: u32,
    existing_task_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Task, GradeError> {
    generate_with(
        identity,
        template_id,
        round,
        existing_task_id,
        now,
        &mut rand::thread_rng(),
    )
}

/// Generate a task, drawing the round-2 variant from `rng`.
///
/// Round-1 template selection without an explicit id is drawn from the seed's
/// own stream, so it is uniform across identities but stable within an hour.
pub fn generate_with<R: Rng + ?Sized>(
    identity: &str,
    template_id: Option<&str>,
    round: u32,
    existing_task_id: Option<&str>,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<Task, GradeError> {
    if round == 0 {
        return Err(GradeError::Validation("round must be 1 or greater".to_string()));
    }

    let seed = derive_seed(identity, now);

    let template: &'static TaskTemplate = match template_id {
        Some(id) => find_template(id).ok_or_else(|| GradeError::TemplateNotFound(id.to_string()))?,
        None if round == 1 => TEMPLATES
            .choose(&mut seeded_rng(&seed, "template"))
            .unwrap_or(&TEMPLATES[0]),
        None => {
            let task_id = existing_task_id.ok_or(GradeError::MissingTaskId)?;
            let id = template_id_of(task_id);
            find_template(id).ok_or_else(|| GradeError::TemplateNotFound(id.to_string()))?
        }
    };

    if round == 1 {
        let task = render_initial(template, &seed);
        tracing::debug!(identity, task_id = %task.task_id, seed = %seed, "Generated round 1 task");
        return Ok(task);
    }

    let result = format_result((template.result)(&seed));
    let task_id = existing_task_id.ok_or(GradeError::MissingTaskId)?;
    let variant = template
        .round2
        .choose(rng)
        .ok_or_else(|| GradeError::TemplateNotFound(format!("{} (round {})", template.id, round)))?;

    let brief = render(variant.brief, &seed, &result);
    let attachments = variant
        .attachments
        .map(|generate| generate(&seed))
        .unwrap_or_default();
    let checks = render_checks(variant.checks, &seed, &result);

    tracing::debug!(identity, task_id, round, "Generated follow-up task");

    Ok(Task {
        template_id: template.id.to_string(),
        task_id: task_id.to_string(),
        round,
        seed,
        brief,
        checks,
        attachments,
    })
}
