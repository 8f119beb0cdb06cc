//! Coordination-store key naming, unchanged from the key table in §6.

pub fn ratelimit_tokens(domain: &str) -> String {
    format!("ratelimit:{domain}:tokens")
}

pub fn ratelimit_last_update(domain: &str) -> String {
    format!("ratelimit:{domain}:last_update")
}

pub fn circuit_state(domain: &str) -> String {
    format!("circuit:{domain}:state")
}

pub fn circuit_failures(domain: &str) -> String {
    format!("circuit:{domain}:failures")
}

pub fn circuit_opened_at(domain: &str) -> String {
    format!("circuit:{domain}:opened_at")
}

pub fn circuit_last_block(domain: &str) -> String {
    format!("circuit:{domain}:last_block")
}

pub fn scraping_status(job_id: &str) -> String {
    format!("scraping:{job_id}:status")
}

pub fn scraping_total_chunks(job_id: &str) -> String {
    format!("scraping:{job_id}:total_chunks")
}

pub fn scraping_completed_chunks(job_id: &str) -> String {
    format!("scraping:{job_id}:completed_chunks")
}

pub fn scraping_total_urls(job_id: &str) -> String {
    format!("scraping:{job_id}:total_urls")
}

pub fn scraping_result_count(job_id: &str) -> String {
    format!("scraping:{job_id}:result_count")
}

pub fn scraping_error_count(job_id: &str) -> String {
    format!("scraping:{job_id}:error_count")
}

pub fn scraping_started_at(job_id: &str) -> String {
    format!("scraping:{job_id}:started_at")
}

pub fn scraping_completed_at(job_id: &str) -> String {
    format!("scraping:{job_id}:completed_at")
}

pub const JOB_KEY_TTL_SECONDS: u64 = 3600;
