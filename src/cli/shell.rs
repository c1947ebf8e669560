//! Line-oriented interactive search over a [`SearchSession`].

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::controller::Event;
use crate::controller::session::SearchSession;
use crate::entities::QueryMode;
use crate::error::DrugBaseError;
use crate::render;
use crate::render::markdown::PaginationFooterMode;

const HELP: &str = "\
Commands:
  <text>            search for <text> in the current mode
  term <text>       search for <text> even if it looks like a command
  clear             clear the search term
  mode [MODE]       switch to MODE (drug, disease, multi) or cycle to the next one
  next | prev       page forward or back
  min +N | -N | N   adjust or set the minimum disease count (multi mode)
  show N            show result N with its price comparison
  refresh           print the current page again
  help              show this help
  quit              exit
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinChange {
    By(i64),
    To(u32),
}

/// Commands that become controller events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCommand {
    Term(String),
    Clear,
    Mode(Option<QueryMode>),
    Next,
    Prev,
    MinDiseases(MinChange),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Search(SearchCommand),
    Show(usize),
    Refresh,
    Help,
    Quit,
}

fn parse_min(arg: &str) -> Result<MinChange, DrugBaseError> {
    let invalid =
        || DrugBaseError::InvalidArgument(format!("min expects +N, -N, or N; got '{arg}'"));
    if let Some(delta) = arg.strip_prefix('+') {
        return delta.parse().map(MinChange::By).map_err(|_| invalid());
    }
    if arg.starts_with('-') {
        return arg.parse().map(MinChange::By).map_err(|_| invalid());
    }
    arg.parse().map(MinChange::To).map_err(|_| invalid())
}

/// Parses one input line. Lines that are not a command are search terms.
pub fn parse_command(line: &str) -> Result<ShellCommand, DrugBaseError> {
    let trimmed = line.trim();
    let Some(tokens) = shlex::split(trimmed) else {
        return Err(DrugBaseError::InvalidArgument(format!(
            "Invalid command syntax: {trimmed}"
        )));
    };
    let Some(head) = tokens.first() else {
        return Ok(ShellCommand::Refresh);
    };
    let args = &tokens[1..];

    let command = match (head.to_ascii_lowercase().as_str(), args) {
        ("quit" | "exit", []) => ShellCommand::Quit,
        ("help" | "?", []) => ShellCommand::Help,
        ("refresh", []) => ShellCommand::Refresh,
        ("clear", []) => ShellCommand::Search(SearchCommand::Clear),
        ("next" | "n", []) => ShellCommand::Search(SearchCommand::Next),
        ("prev" | "p", []) => ShellCommand::Search(SearchCommand::Prev),
        ("mode", []) => ShellCommand::Search(SearchCommand::Mode(None)),
        ("mode", [mode]) => ShellCommand::Search(SearchCommand::Mode(Some(mode.parse()?))),
        ("min", [arg]) => ShellCommand::Search(SearchCommand::MinDiseases(parse_min(arg)?)),
        ("show", [n]) => match n.parse::<usize>() {
            Ok(n) if n > 0 => ShellCommand::Show(n),
            _ => {
                return Err(DrugBaseError::InvalidArgument(format!(
                    "show expects a result number, got '{n}'"
                )));
            }
        },
        ("term", rest) if !rest.is_empty() => {
            ShellCommand::Search(SearchCommand::Term(rest.join(" ")))
        }
        _ => ShellCommand::Search(SearchCommand::Term(trimmed.to_string())),
    };
    Ok(command)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShellOptions {
    pub json: bool,
    /// Wait for each command's fetches to finish before reading the next line.
    pub batch: bool,
}

enum Input {
    Line(Option<String>),
    Event(Option<Event>),
}

fn render_page(session: &SearchSession, json: bool) -> Result<String, DrugBaseError> {
    let ctl = session.controller();
    if json {
        render::json::search_page_json(ctl)
    } else {
        render::markdown::search_page_markdown(ctl, PaginationFooterMode::Shell)
    }
}

fn render_detail(session: &SearchSession, n: usize, json: bool) -> Result<String, DrugBaseError> {
    let results = session.controller().normalized();
    let Some(drug) = results.get(n - 1) else {
        return Err(DrugBaseError::InvalidArgument(format!(
            "No result {n} on this page ({} shown)",
            results.len()
        )));
    };
    if json {
        render::json::to_pretty(drug)
    } else {
        render::markdown::drug_detail_markdown(drug)
    }
}

async fn write_block<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> std::io::Result<()> {
    out.write_all(text.as_bytes()).await?;
    if !text.ends_with('\n') {
        out.write_all(b"\n").await?;
    }
    out.flush().await
}

/// Maps a command to a controller event, or a message when it cannot apply.
fn command_event(
    session: &SearchSession,
    command: SearchCommand,
) -> Result<Event, &'static str> {
    let ctl = session.controller();
    match command {
        SearchCommand::Term(term) => Ok(Event::SearchTermChanged(term)),
        SearchCommand::Clear => Ok(Event::SearchTermChanged(String::new())),
        SearchCommand::Mode(mode) => Ok(Event::ModeToggled(
            mode.unwrap_or_else(|| ctl.state().mode.next()),
        )),
        SearchCommand::Next if ctl.can_go_next() => Ok(Event::NextPageRequested),
        SearchCommand::Next => Err("No further pages."),
        SearchCommand::Prev if ctl.can_go_prev() => Ok(Event::PrevPageRequested),
        SearchCommand::Prev => Err("Already on the first page."),
        SearchCommand::MinDiseases(change) => {
            let delta = match change {
                MinChange::By(delta) => delta,
                MinChange::To(target) => i64::from(target) - i64::from(ctl.state().min_diseases),
            };
            Ok(Event::MinDiseasesChanged(delta))
        }
    }
}

/// Runs the shell until `quit` or end of input.
///
/// # Errors
///
/// Returns an error when reading input or writing output fails.
pub async fn run<R, W>(
    mut session: SearchSession,
    input: R,
    mut out: W,
    options: ShellOptions,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    session.start();
    write_block(&mut out, "DrugBase shell. Type `help` for commands.").await?;
    let mut dirty = true;

    loop {
        if options.batch {
            session.settle().await;
        }
        if dirty && !session.is_busy() {
            write_block(&mut out, &render_page(&session, options.json)?).await?;
            dirty = false;
        }

        let input = if options.batch || !session.is_busy() {
            Input::Line(lines.next_line().await?)
        } else {
            tokio::select! {
                line = lines.next_line() => Input::Line(line?),
                event = session.next_event() => Input::Event(event),
            }
        };

        let line = match input {
            Input::Event(Some(event)) => {
                dirty |= matches!(
                    event,
                    Event::FetchSucceeded { .. } | Event::FetchFailed { .. }
                );
                session.dispatch(event);
                continue;
            }
            Input::Event(None) => continue,
            Input::Line(None) => {
                session.settle().await;
                if dirty {
                    write_block(&mut out, &render_page(&session, options.json)?).await?;
                }
                break;
            }
            Input::Line(Some(line)) => line,
        };

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(err) => {
                write_block(&mut out, &format!("Error: {err}")).await?;
                continue;
            }
        };
        match command {
            ShellCommand::Quit => break,
            ShellCommand::Help => write_block(&mut out, HELP).await?,
            ShellCommand::Refresh => dirty = true,
            ShellCommand::Show(n) => {
                let text = render_detail(&session, n, options.json)
                    .unwrap_or_else(|err| format!("Error: {err}"));
                write_block(&mut out, &text).await?;
            }
            ShellCommand::Search(command) => match command_event(&session, command) {
                Ok(event) => {
                    session.dispatch(event);
                    dirty = true;
                }
                Err(message) => write_block(&mut out, message).await?,
            },
        }
    }

    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::controller::{ControllerConfig, SearchController};
    use crate::sources::drugbase::DrugBaseClient;

    #[test]
    fn plain_text_is_a_search_term() {
        assert_eq!(
            parse_command("  aspirin 81mg ").unwrap(),
            ShellCommand::Search(SearchCommand::Term("aspirin 81mg".into()))
        );
        assert_eq!(
            parse_command("term next").unwrap(),
            ShellCommand::Search(SearchCommand::Term("next".into()))
        );
        assert_eq!(parse_command("").unwrap(), ShellCommand::Refresh);
    }

    #[test]
    fn parses_commands() {
        assert_eq!(
            parse_command("NEXT").unwrap(),
            ShellCommand::Search(SearchCommand::Next)
        );
        assert_eq!(
            parse_command("prev").unwrap(),
            ShellCommand::Search(SearchCommand::Prev)
        );
        assert_eq!(
            parse_command("mode").unwrap(),
            ShellCommand::Search(SearchCommand::Mode(None))
        );
        assert_eq!(
            parse_command("mode disease").unwrap(),
            ShellCommand::Search(SearchCommand::Mode(Some(QueryMode::Disease)))
        );
        assert_eq!(
            parse_command("min +2").unwrap(),
            ShellCommand::Search(SearchCommand::MinDiseases(MinChange::By(2)))
        );
        assert_eq!(
            parse_command("min -1").unwrap(),
            ShellCommand::Search(SearchCommand::MinDiseases(MinChange::By(-1)))
        );
        assert_eq!(
            parse_command("min 4").unwrap(),
            ShellCommand::Search(SearchCommand::MinDiseases(MinChange::To(4)))
        );
        assert_eq!(parse_command("show 3").unwrap(), ShellCommand::Show(3));
        assert_eq!(parse_command("quit").unwrap(), ShellCommand::Quit);
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(parse_command("show 0").is_err());
        assert!(parse_command("min lots").is_err());
        assert!(parse_command("mode gene").is_err());
        assert!(parse_command("\"unterminated").is_err());
    }

    #[test]
    fn search_commands_map_to_events_or_messages() {
        let client = DrugBaseClient::new_for_test("http://127.0.0.1".into()).unwrap();
        let session = SearchSession::new(
            SearchController::new(ControllerConfig::default()),
            client,
        );

        assert_eq!(
            command_event(&session, SearchCommand::Next),
            Err("No further pages.")
        );
        assert_eq!(
            command_event(&session, SearchCommand::Prev),
            Err("Already on the first page.")
        );
        assert_eq!(
            command_event(&session, SearchCommand::Mode(None)),
            Ok(Event::ModeToggled(QueryMode::Disease))
        );
        assert_eq!(
            command_event(&session, SearchCommand::Clear),
            Ok(Event::SearchTermChanged(String::new()))
        );
        assert_eq!(
            command_event(&session, SearchCommand::MinDiseases(MinChange::To(5))),
            Ok(Event::MinDiseasesChanged(3))
        );
    }

    async fn run_script(server: &MockServer, mode: QueryMode, script: &str) -> String {
        let config = ControllerConfig {
            debounce: Duration::from_millis(5),
            initial_mode: mode,
            ..ControllerConfig::default()
        };
        let client = DrugBaseClient::new_for_test(server.uri()).unwrap();
        let session = SearchSession::new(SearchController::new(config), client);
        let mut out = Vec::new();
        run(
            session,
            script.as_bytes(),
            &mut out,
            ShellOptions {
                json: false,
                batch: true,
            },
        )
        .await
        .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn scripted_search_pages_and_shows_detail() {
        let server = MockServer::start().await;
        let page = |ids: std::ops::RangeInclusive<u64>| {
            let rows: Vec<_> = ids
                .map(|id| json!([format!("Drug{id}"), id, "generic", "Pain", "Acme", 10.0, 40.0]))
                .collect();
            json!({ "data": rows })
        };
        Mock::given(method("GET"))
            .and(path("/Drug_Search/0/aspirin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(1..=6)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/Drug_Search/6/aspirin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(7..=8)))
            .mount(&server)
            .await;

        let out = run_script(&server, QueryMode::Drug, "aspirin\nnext\nnext\nshow 2\nquit\n").await;

        assert!(out.contains("Type a search term to begin."));
        assert!(out.contains("| 1 | 1 | Drug1 |"));
        assert!(out.contains("| 1 | 7 | Drug7 |"));
        assert!(out.contains("Page 2 (cursor 8). Type `prev` to page."));
        assert!(out.contains("No further pages."));
        assert!(out.contains("# Drug8"));
        assert!(out.contains("Generic saves $30.00 (75%) per unit."));
    }

    #[tokio::test]
    async fn scripted_multi_threshold_change_refetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Multi_Disease_Treatment/0/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [["Metformin", 8, 3, "Diabetes,PCOS,Obesity", "Merck", 15.25]]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/Multi_Disease_Treatment/0/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let out = run_script(&server, QueryMode::Multi, "min 5\nshow 1\n").await;

        assert!(out.contains("| Metformin |"));
        assert!(out.contains("Minimum diseases treated: 5"));
        assert!(out.contains("No results found."));
        assert!(out.contains("Error: Invalid argument: No result 1 on this page (0 shown)"));
    }

    #[tokio::test]
    async fn mode_switch_clears_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Drug_Search/0/ibuprofen"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [["Advil", 4, "ibuprofen", "Pain", "Pfizer", 3.25, 9.99]]
            })))
            .mount(&server)
            .await;

        let out = run_script(&server, QueryMode::Drug, "ibuprofen\nmode disease\n").await;
        assert!(out.contains("| Advil |"));
        let last_page = out.rsplit("# ").next().unwrap();
        assert!(last_page.starts_with("Disease Search"));
        assert!(last_page.contains("Type a search term to begin."));
    }
}
