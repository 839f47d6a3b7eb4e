//! Subcommand execution and terminal output.

use std::io::Write;

use parley_engine::{
    ConversationId, ConversationView, EngineError, Message, MessageId, Role, SendOutcome,
    SessionController,
};
use tokio::task::JoinHandle;

use crate::cli::Command;

pub async fn run(controller: &SessionController, command: Command) -> Result<(), EngineError> {
    match command {
        Command::List { skip, limit } => {
            let sessions = controller.list(Some(skip), Some(limit)).await?;
            if sessions.is_empty() {
                println!("no conversations");
            }
            for s in sessions {
                println!(
                    "{:>6}  {}  {}",
                    s.id,
                    s.updated_at.format("%Y-%m-%d %H:%M"),
                    s.title
                );
            }
        }
        Command::New { title } => {
            let summary = controller.create(title.as_deref()).await?;
            println!("created conversation {} ({})", summary.id, summary.title);
        }
        Command::Show { id } => {
            let view = controller.load(id).await?;
            print_view(&view);
        }
        Command::Chat { id, prompt } => {
            controller.load(id).await?;
            let prompt = prompt.join(" ");
            stream_cycle(controller, id, Cycle::Send(&prompt)).await?;
        }
        Command::Retry { id } => {
            controller.load(id).await?;
            stream_cycle(controller, id, Cycle::Retry).await?;
        }
        Command::Feedback {
            session,
            message,
            vote,
        } => {
            controller.load(session).await?;
            controller
                .submit_feedback(&MessageId::Server(message), vote)
                .await?;
            println!("recorded {vote:?} on message {message}");
        }
        Command::Rename { id, title } => {
            let summary = controller.rename(id, &title.join(" ")).await?;
            println!("renamed {} to {}", summary.id, summary.title);
        }
        Command::Delete { id } => {
            controller.delete(id).await?;
            println!("deleted conversation {id}");
        }
        Command::Metrics { id } => {
            let m = controller.metrics(id).await?;
            println!("messages        {}", m.total_messages);
            println!("tokens          {}", m.total_tokens);
            println!("tokens/sec      {:.1}", m.avg_tokens_per_second);
            println!("response time   {:.0} ms", m.avg_response_time_ms);
        }
        // printed in main before a controller exists
        Command::Config => {}
    }
    Ok(())
}

enum Cycle<'a> {
    Send(&'a str),
    Retry,
}

/// Run one send cycle, echoing fragments as they land in the store.
/// Ctrl-C cancels the stream and is not an error.
async fn stream_cycle(
    controller: &SessionController,
    id: ConversationId,
    cycle: Cycle<'_>,
) -> Result<(), EngineError> {
    let echo = spawn_echo(controller, id);

    let run = async {
        match cycle {
            Cycle::Send(prompt) => controller.send(id, prompt).await.map(Some),
            Cycle::Retry => controller.retry(id).await,
        }
    };
    tokio::pin!(run);

    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        _ = tokio::signal::ctrl_c() => {
            controller.cancel(id);
            run.await
        }
    };

    let printed = echo.finish().await;
    match outcome? {
        None => println!("nothing to retry"),
        Some(SendOutcome::Completed { reply }) => {
            print_remainder(&reply.content, &printed);
            println!();
            if let Some(line) = metrics_line(&reply) {
                eprintln!("{line}");
            }
        }
        Some(SendOutcome::Cancelled) | Some(SendOutcome::Superseded) => {
            println!();
            eprintln!("[cancelled]");
        }
    }
    Ok(())
}

struct Echo {
    task: JoinHandle<String>,
    stop: tokio::sync::oneshot::Sender<()>,
}

impl Echo {
    /// Stop echoing; returns everything printed so far.
    async fn finish(self) -> String {
        let _ = self.stop.send(());
        self.task.await.unwrap_or_default()
    }
}

fn spawn_echo(controller: &SessionController, id: ConversationId) -> Echo {
    let mut rx = controller.store().subscribe(id);
    let (stop, mut stopped) = tokio::sync::oneshot::channel();
    let task = tokio::spawn(async move {
        let mut printed = String::new();
        loop {
            let text = rx
                .borrow_and_update()
                .streaming_text()
                .map(str::to_string);
            if let Some(text) = text {
                if let Some(delta) = text.strip_prefix(printed.as_str()) {
                    if !delta.is_empty() {
                        print!("{delta}");
                        let _ = std::io::stdout().flush();
                        printed.push_str(delta);
                    }
                }
            }
            tokio::select! {
                changed = rx.changed() => if changed.is_err() { break },
                _ = &mut stopped => break,
            }
        }
        printed
    });
    Echo { task, stop }
}

/// Snapshots can coalesce, so the tail of a reply may never have been
/// echoed while streaming. When the confirmed reply does not extend what
/// was echoed, it is printed again in full.
fn print_remainder(reply: &str, printed: &str) {
    print!("{}", remainder(reply, printed));
    let _ = std::io::stdout().flush();
}

fn remainder(reply: &str, printed: &str) -> String {
    match reply.strip_prefix(printed) {
        Some(rest) => rest.to_string(),
        None => format!("\n{reply}"),
    }
}

fn metrics_line(message: &Message) -> Option<String> {
    let m = message.metrics?;
    let mut line = format!("[{} tokens, {:.1} tok/s", m.tokens, m.tokens_per_second);
    if let Some(ms) = m.response_time_ms {
        line.push_str(&format!(", {ms:.0} ms"));
    }
    line.push(']');
    Some(line)
}

fn print_view(view: &ConversationView) {
    if let Some(title) = view.title() {
        println!("# {title}");
    }
    for message in view.messages() {
        println!("{}", render_message(message));
    }
}

fn render_message(message: &Message) -> String {
    let role = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    let mut out = format!("[{}] {role}: {}", message.id, message.content);
    if let Some(feedback) = message.feedback {
        out.push_str(&format!(" ({feedback:?})"));
    }
    if let Some(line) = metrics_line(message) {
        out.push(' ');
        out.push_str(&line);
    }
    out
}
