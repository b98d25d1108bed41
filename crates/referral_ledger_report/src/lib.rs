//! Static HTML report of ledger totals, leaderboard and unsettled claims.

use referral_ledger::ReportData;
use std::io::Write;
use std::path::Path;

const VOLUME_PLACES: u32 = 2;
const COMMISSION_PLACES: u32 = 4;

/// Render a static HTML report to `out_path`. Embeds the full report JSON.
pub fn render_report(data: &ReportData, out_path: impl AsRef<Path>) -> Result<(), ReportError> {
    let html = build_html(data)?;
    let mut f = std::fs::File::create(out_path.as_ref()).map_err(ReportError::Io)?;
    f.write_all(html.as_bytes()).map_err(ReportError::Io)?;
    Ok(())
}

/// Build HTML string from report data (for testing or in-memory use).
pub fn build_html(data: &ReportData) -> Result<String, ReportError> {
    let json_embed = escape_html(&serde_json::to_string(&data).map_err(ReportError::Json)?);
    let totals = &data.totals;

    let mut leaderboard_rows = String::new();
    for (i, row) in data.leaderboard.iter().enumerate() {
        leaderboard_rows.push_str(&format!(
            "<tr><td>{}</td><td class=\"mono\">{}</td><td>{}</td><td>{:.2}x</td><td>{}</td></tr>",
            i + 1,
            escape_html(&row.address),
            row.credits,
            row.multiplier,
            row.referrals,
        ));
    }
    if leaderboard_rows.is_empty() {
        leaderboard_rows.push_str("<tr><td colspan=\"5\">No accounts yet.</td></tr>");
    }

    let mut claim_rows = String::new();
    for claim in &data.unsettled_claims {
        claim_rows.push_str(&format!(
            "<tr><td>{}</td><td class=\"mono\">{}</td><td>{}</td><td>{}</td></tr>",
            claim.id,
            escape_html(claim.address.as_str()),
            claim.amount.format_fixed(COMMISSION_PLACES),
            claim.claimed_at,
        ));
    }
    if claim_rows.is_empty() {
        claim_rows.push_str("<tr><td colspan=\"4\">All claims settled.</td></tr>");
    }

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8"/>
<meta name="viewport" content="width=device-width,initial-scale=1"/>
<title>Referral Ledger Report</title>
<style>
:root {{ font-family: system-ui, sans-serif; background: #0f1419; color: #e6edf3; }}
body {{ max-width: 860px; margin: 0 auto; padding: 1.5rem; }}
h1 {{ font-size: 1.4rem; margin-bottom: 0.5rem; }}
h2 {{ font-size: 1.1rem; margin-top: 1.5rem; color: #8b949e; }}
.mono {{ font-family: ui-monospace, monospace; font-size: 0.9em; word-break: break-all; }}
.card {{ background: #161b22; border: 1px solid #30363d; border-radius: 6px; padding: 1rem; margin: 0.5rem 0; }}
.grid {{ display: grid; grid-template-columns: auto 1fr; gap: 0.25rem 1rem; }}
.label {{ color: #8b949e; }}
table {{ width: 100%; border-collapse: collapse; }}
th, td {{ text-align: left; padding: 0.25rem 0.5rem; border-bottom: 1px solid #30363d; }}
.footer {{ margin-top: 2rem; font-size: 0.85rem; color: #8b949e; }}
</style>
</head>
<body>
<h1>Referral Ledger Report</h1>
<p>Generated: {generated}</p>

<h2>Totals</h2>
<div class="card">
  <div class="grid">
    <span class="label">Accounts</span><span>{accounts}</span>
    <span class="label">Linked accounts</span><span>{linked}</span>
    <span class="label">Volume referred</span><span class="mono">{volume}</span>
    <span class="label">Pending commission</span><span class="mono">{pending}</span>
    <span class="label">Total earned</span><span class="mono">{earned}</span>
  </div>
</div>

<h2>Leaderboard</h2>
<div class="card">
  <table>
    <tr><th>#</th><th>Address</th><th>Credits</th><th>Multiplier</th><th>Referrals</th></tr>
    {leaderboard_rows}
  </table>
</div>

<h2>Unsettled claims</h2>
<div class="card">
  <table>
    <tr><th>ID</th><th>Address</th><th>Amount</th><th>Claimed at</th></tr>
    {claim_rows}
  </table>
</div>

<h2>Reproducibility</h2>
<div class="card">
  <div class="mono">SHA-256: {hash}</div>
  <p class="footer">Check a ledger export with <code>referral-ledger verify --snapshot &lt;file&gt;</code> and compare the hash.</p>
</div>

<h2>Report data (embedded)</h2>
<div class="card">
  <script type="application/json" id="report-data">{json_embed}</script>
</div>
</body>
</html>"#,
        generated = escape_html(&data.generated_utc_rfc3339),
        accounts = totals.accounts,
        linked = totals.linked_accounts,
        volume = totals.total_volume_referred.format_fixed(VOLUME_PLACES),
        pending = totals.pending_commission.format_fixed(COMMISSION_PLACES),
        earned = totals.total_earned.format_fixed(COMMISSION_PLACES),
        leaderboard_rows = leaderboard_rows,
        claim_rows = claim_rows,
        hash = escape_html(&data.snapshot_hash_sha256),
        json_embed = json_embed,
    );
    Ok(html)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug)]
pub enum ReportError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Io(e) => write!(f, "io: {}", e),
            ReportError::Json(e) => write!(f, "json: {}", e),
        }
    }
}

impl std::error::Error for ReportError {}
