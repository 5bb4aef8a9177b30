//! REPL – Read-Eval-Print Loop for the ensemble interactive shell.
//!
//! Supported slash-commands:
//!   /goal <controller> <child> <action> [data] [when=<event>]
//!                   – send a goal through a controller
//!   /event <name>   – signal a condition event
//!   /clear <name>   – lower a condition event
//!   /status         – node states and controller goal states
//!   /cancel <controller> – preempt the controller's goal
//!   /help           – show this list
//!   /quit | /exit   – exit the CLI

use colored::Colorize;
use std::io::{self, BufRead, Write};

use ensemble_action::{GoalCallbacks, ServerState};
use ensemble_types::{Goal, GoalStatus};
use tokio::runtime::Runtime;

use crate::topology::Topology;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Goal {
        controller: String,
        child: String,
        action: String,
        data: String,
        condition: Option<String>,
    },
    Event(String),
    Clear(String),
    Status,
    Cancel(String),
    Help,
    Quit,
}

/// Parse one input line.
pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let rest: Vec<&str> = words.collect();

    match head {
        "/goal" => {
            let [controller, child, action, extra @ ..] = rest.as_slice() else {
                return Err("usage: /goal <controller> <child> <action> [data] [when=<event>]".to_string());
            };
            let mut condition = None;
            let mut data = Vec::new();
            for word in extra {
                match word.strip_prefix("when=") {
                    Some(event) if !event.is_empty() => condition = Some(event.to_string()),
                    Some(_) => return Err("when= needs an event name".to_string()),
                    None => data.push(*word),
                }
            }
            Ok(Command::Goal {
                controller: controller.to_string(),
                child: child.to_string(),
                action: action.to_string(),
                data: data.join(" "),
                condition,
            })
        }
        "/event" | "/clear" | "/cancel" => {
            let [name] = rest.as_slice() else {
                return Err(format!("usage: {head} <name>"));
            };
            let name = name.to_string();
            Ok(match head {
                "/event" => Command::Event(name),
                "/clear" => Command::Clear(name),
                _ => Command::Cancel(name),
            })
        }
        "/status" => Ok(Command::Status),
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("unknown command '{other}'")),
    }
}

/// Entry point for the interactive REPL.  Returns on `/quit` or end of
/// input.
pub fn run(runtime: &Runtime, topology: &Topology) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", "ensemble>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse(line) {
            Ok(Command::Goal {
                controller,
                child,
                action,
                data,
                condition,
            }) => cmd_goal(runtime, topology, &controller, child, action, data, condition),
            Ok(Command::Event(name)) => {
                topology.events().signal(&name);
                println!("{} {}", "✓ Event signalled:".green(), name.bold());
            }
            Ok(Command::Clear(name)) => {
                topology.events().clear(&name);
                println!("{} {}", "✓ Event cleared:".green(), name.bold());
            }
            Ok(Command::Status) => cmd_status(topology),
            Ok(Command::Cancel(controller)) => match topology.client(&controller) {
                Some(client) => {
                    client.cancel_all_goals();
                    println!("{} {}", "✓ Cancel sent to".green(), controller.bold());
                }
                None => println!("{} '{}'", "Unknown controller:".red(), controller.yellow()),
            },
            Ok(Command::Help) => cmd_help(),
            Ok(Command::Quit) => {
                topology.cancel_all();
                println!("{}", "Goodbye.".green());
                break;
            }
            Err(e) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                e,
                "/help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Ensemble Commands".bold().underline());
    println!(
        "  {} – send a goal",
        "/goal <controller> <child> <action> [data] [when=<event>]".bold().cyan()
    );
    println!("  {}        – signal a condition event", "/event <name>".bold().cyan());
    println!("  {}        – lower a condition event", "/clear <name>".bold().cyan());
    println!("  {}              – node and goal states", "/status".bold().cyan());
    println!("  {} – preempt a controller's goal", "/cancel <controller>".bold().cyan());
    println!("  {}         – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_goal(
    runtime: &Runtime,
    topology: &Topology,
    controller: &str,
    child: String,
    action: String,
    data: String,
    condition: Option<String>,
) {
    let Some(client) = topology.client(controller) else {
        println!("{} '{}'", "Unknown controller:".red(), controller.yellow());
        return;
    };

    let mut goal = Goal::new(action).for_child(child).with_data(data);
    if let Some(event) = condition {
        println!("  {} {}", "gated on".dimmed(), event.yellow());
        goal = goal.with_condition(event);
    }

    let label = controller.to_string();
    let callbacks = GoalCallbacks::new()
        .on_feedback({
            let label = label.clone();
            move |fb| {
                println!(
                    "  {} [{}] #{} {} {}",
                    "…".dimmed(),
                    label.cyan(),
                    fb.seq,
                    fb.state.to_string().yellow(),
                    fb.message
                )
            }
        })
        .on_result(move |status, result| {
            let status = match status {
                GoalStatus::Succeeded => status.to_string().green().bold(),
                _ => status.to_string().red().bold(),
            };
            println!(
                "  {} [{}] {} {} (continue: {})",
                "■".bold(),
                label.cyan(),
                status,
                result.message,
                result.do_continue
            );
        });

    let outcome = runtime.block_on(client.send_goal(goal, callbacks, false));
    match outcome.status {
        GoalStatus::Lost => println!(
            "{} controller '{}' is unreachable",
            "✗".red().bold(),
            controller.yellow()
        ),
        status => println!(
            "{} goal {} {}",
            "✓".green().bold(),
            outcome.goal_id.to_string().dimmed(),
            status.to_string().yellow()
        ),
    }
}

fn cmd_status(topology: &Topology) {
    println!("{}", "Nodes".bold().underline());
    for node in topology.status() {
        let state = match node.state {
            ServerState::Idle => "idle".green(),
            ServerState::Executing => "executing".yellow(),
            ServerState::Succeeded | ServerState::Preempted | ServerState::Failed => {
                "finishing".yellow()
            }
        };
        let last = node
            .last_outcome
            .map_or_else(|| "-".to_string(), |s| s.to_string());
        println!("  {:<12} {:<10} last: {}", node.name.bold(), state, last.dimmed());
    }

    println!("{}", "Controller goals".bold().underline());
    for (name, client) in topology.controllers() {
        println!("  {:<12} {}", name.bold(), client.get_state().to_string().yellow());
    }

    match topology.events().last_event() {
        Some(event) => println!("  last event: {}", event.cyan()),
        None => println!("  last event: {}", "-".dimmed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_with_data_and_condition() {
        assert_eq!(
            parse("/goal greeter speaker do_speaker hello.wav when=face_seen").unwrap(),
            Command::Goal {
                controller: "greeter".into(),
                child: "speaker".into(),
                action: "do_speaker".into(),
                data: "hello.wav".into(),
                condition: Some("face_seen".into()),
            }
        );
    }

    #[test]
    fn goal_data_keeps_multiple_words() {
        match parse("/goal listener chat request how are you").unwrap() {
            Command::Goal { data, condition, .. } => {
                assert_eq!(data, "how are you");
                assert_eq!(condition, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn goal_needs_three_arguments() {
        assert!(parse("/goal greeter speaker").unwrap_err().starts_with("usage"));
        assert!(parse("/goal a b c when=").is_err());
    }

    #[test]
    fn single_argument_commands() {
        assert_eq!(parse("/event face_seen").unwrap(), Command::Event("face_seen".into()));
        assert_eq!(parse("/clear face_seen").unwrap(), Command::Clear("face_seen".into()));
        assert_eq!(parse("/cancel greeter").unwrap(), Command::Cancel("greeter".into()));
        assert!(parse("/event").is_err());
        assert!(parse("/event a b").is_err());
    }

    #[test]
    fn plain_commands() {
        assert_eq!(parse("/status").unwrap(), Command::Status);
        assert_eq!(parse("/help").unwrap(), Command::Help);
        assert_eq!(parse("/exit").unwrap(), Command::Quit);
        assert!(parse("/dance").unwrap_err().contains("/dance"));
    }
}
