use std::sync::OnceLock;

use minijinja::{Environment, context};

use crate::controller::SearchController;
use crate::entities::QueryMode;
use crate::entities::drug::NormalizedDrug;
use crate::error::DrugBaseError;

static ENV: OnceLock<Environment<'static>> = OnceLock::new();

/// Where pagination hints point the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationFooterMode {
    /// One-shot `search` command: `--page N`.
    Cli,
    /// Interactive shell: `next` / `prev`.
    Shell,
}

pub fn pagination_footer(ctl: &SearchController, mode: PaginationFooterMode) -> String {
    let state = ctl.state();
    if state.results.is_empty() {
        return String::new();
    }
    let page = state.page_number();
    let mut footer = format!("Page {page} (cursor {}).", state.cursor);
    match mode {
        PaginationFooterMode::Cli => {
            if state.has_more {
                footer.push_str(&format!(" Use --page {} for more.", page + 1));
            }
        }
        PaginationFooterMode::Shell => {
            let mut moves = Vec::new();
            if ctl.can_go_prev() {
                moves.push("`prev`");
            }
            if ctl.can_go_next() {
                moves.push("`next`");
            }
            if !moves.is_empty() {
                footer.push_str(&format!(" Type {} to page.", moves.join(" or ")));
            }
        }
    }
    footer
}

fn with_pagination_footer(mut body: String, pagination_footer: &str) -> String {
    let footer = pagination_footer.trim();
    if footer.is_empty() {
        return body;
    }
    if !body.ends_with('\n') {
        body.push('\n');
    }
    body.push('\n');
    body.push_str(footer);
    body.push('\n');
    body
}

fn money(v: f64) -> String {
    format!("${v:.2}")
}

fn env() -> Result<&'static Environment<'static>, DrugBaseError> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let mut env = Environment::new();
    env.add_filter("truncate", |s: String, max_bytes: usize| -> String {
        if s.len() <= max_bytes {
            return s;
        }
        let mut boundary = max_bytes;
        while boundary > 0 && !s.is_char_boundary(boundary) {
            boundary -= 1;
        }
        let mut out = s[..boundary].trim_end().to_string();
        out.push('…');
        out
    });
    env.add_filter("cell", |s: String| -> String {
        s.replace('|', "\\|").replace(['\n', '\r'], " ")
    });
    env.add_filter("money", money);
    env.add_filter("pct", |v: f64| -> String { format!("{v:.0}%") });
    env.add_template(
        "search_page.md.j2",
        include_str!("../../templates/search_page.md.j2"),
    )?;
    env.add_template(
        "drug_detail.md.j2",
        include_str!("../../templates/drug_detail.md.j2"),
    )?;

    Ok(ENV.get_or_init(|| env))
}

/// Renders the controller's current page as a markdown table.
pub fn search_page_markdown(
    ctl: &SearchController,
    footer_mode: PaginationFooterMode,
) -> Result<String, DrugBaseError> {
    let tmpl = env()?.get_template("search_page.md.j2")?;
    let state = ctl.state();
    let query = match state.mode {
        QueryMode::Multi => "",
        _ => state.search_term.trim(),
    };
    let body = tmpl.render(context! {
        label => state.mode.label(),
        mode => state.mode.as_str(),
        query => query,
        min_diseases => state.min_diseases,
        phase => ctl.phase(),
        notice => ctl.notice(),
        results => ctl.normalized(),
    })?;
    Ok(with_pagination_footer(
        body,
        &pagination_footer(ctl, footer_mode),
    ))
}

/// Renders one result with its brand vs generic price comparison.
pub fn drug_detail_markdown(drug: &NormalizedDrug) -> Result<String, DrugBaseError> {
    let tmpl = env()?.get_template("drug_detail.md.j2")?;
    let cmp = drug.price_comparison();
    Ok(tmpl.render(context! {
        name => &drug.name,
        id => drug.id,
        generic_name => &drug.generic_name,
        manufacturer => &drug.manufacturer,
        treatment => &drug.treatment,
        disease_count => drug.disease_count,
        brand_price => cmp.brand_price,
        generic_price => cmp.generic_price,
        savings => cmp.savings,
        savings_percent => cmp.savings_percent,
        generic_cheaper => cmp.generic_is_cheaper(),
        fallbacks => &drug.fallbacks,
    })?)
}
