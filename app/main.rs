use std::{env::current_dir, io::stdout, process::ExitCode};

use clap::{Args, Parser, Subcommand};
use wad::{
    diff::{Change, ChangeKind, NodeType},
    Repository, Result,
};

#[derive(Parser, Debug)]
#[clap(name = "wad", about = "a tiny version control system")]
struct Arguments {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[clap(about = "creates a wad in the current directory")]
    Init,
    #[clap(about = "shows the current topic, latest commit and changes")]
    Status,
    #[clap(about = "lists commits from the head backwards")]
    Log {
        #[arg(short, long, default_value_t = 10, help = "how many commits to show")]
        limit: usize,
    },
    #[clap(about = "lists all topics")]
    Topics,
    #[clap(about = "creates a new topic or commit")]
    New(NewArguments),
    #[clap(about = "shows the changes against the head")]
    Diff {
        #[arg(long, help = "print the changes as JSON")]
        json: bool,
    },
    #[clap(about = "goes to the given topic or commit")]
    Goto { reference: String },
}

#[derive(Args, Debug)]
struct NewArguments {
    #[clap(subcommand)]
    what: NewCommand,
}

#[derive(Subcommand, Debug)]
enum NewCommand {
    #[clap(about = "creates a new topic at the head and goes to it")]
    Topic { name: String },
    #[clap(about = "creates a new commit on top of head from the changes")]
    Commit { description: String },
}

fn format_change(change: &Change) -> String {
    let kind = match change.kind {
        ChangeKind::Create => '+',
        ChangeKind::Delete => '-',
        ChangeKind::Modify => '~',
    };
    let node = match change.node {
        NodeType::File => 'f',
        NodeType::Directory => 'd',
    };
    format!("{} {} {}", kind, node, change.path.display())
}

fn run(cmd: Command) -> Result<()> {
    let dir = current_dir()?;
    use Command::*;
    match cmd {
        Init => {
            Repository::init(dir)?;
        }
        Status => {
            let repository = Repository::open(dir)?;
            let head = repository.head()?;
            println!("{}", head);
            println!(
                "latest commit: {}",
                repository.head_commit()?.description()?
            );
            let changes = repository.changes()?;
            if changes.is_empty() {
                println!("No changes.");
            }
            for change in &changes {
                println!("{}", format_change(change));
            }
        }
        Log { limit } => {
            let repository = Repository::open(dir)?;
            for record in repository.history(&repository.head()?)?.take(limit) {
                let record = record?;
                println!("{}    {}", record.reference, record.description);
            }
        }
        Topics => {
            let repository = Repository::open(dir)?;
            let head = repository.head()?;
            for topic in repository.list_topics()? {
                let marker = if topic.reference() == head { '*' } else { ' ' };
                println!(
                    "{}  {}  {:?}",
                    marker,
                    topic.reference(),
                    topic.description()?
                );
            }
        }
        New(NewArguments {
            what: NewCommand::Topic { name },
        }) => {
            let repository = Repository::open(dir)?;
            let topic = repository.new_topic(&name)?;
            println!("{}", topic.reference());
        }
        New(NewArguments {
            what: NewCommand::Commit { description },
        }) => {
            let repository = Repository::open(dir)?;
            let commit = repository.new_commit(&description)?;
            println!("{}", commit.reference());
        }
        Diff { json } => {
            let repository = Repository::open(dir)?;
            let changes = repository.changes()?;
            if json {
                serde_json::to_writer_pretty(stdout(), &changes)?;
                println!();
            } else {
                for change in &changes {
                    println!("{}", format_change(change));
                }
            }
        }
        Goto { reference } => {
            let repository = Repository::open(dir)?;
            repository.goto(&reference)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Arguments::parse();
    match run(args.cmd) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_usage() => {
            eprintln!("{}", err);
            ExitCode::from(1)
        }
        Err(err) => {
            log::error!("{}", err);
            eprintln!("internal error: {:?}", err);
            ExitCode::from(2)
        }
    }
}
