//! Tsubame CLI - persistent, filterable message streams for social feeds.

use clap::Parser;
use std::process;
use tsubame::cli::{
    AccountCommands, Cli, Commands, ConfigCommands, FilterCommands, ListCommands, SourceCommands,
    StreamCommands,
};
use tsubame::commands::{self, FilterOptions, Output, Session, SourceOptions};
use tsubame::config::{
    ConfigOverrides, ConfigPaths, OutputFormat, ResolvedConfig, resolve_config, resolve_data_dir,
};

fn main() {
    let cli = Cli::parse();

    let data_dir = match resolve_data_dir(cli.data_dir.as_deref()) {
        Ok(dir) => dir,
        Err(e) => fail(&e, cli.human_readable),
    };
    let paths = ConfigPaths::for_data_dir(&data_dir);

    let mut overrides = ConfigOverrides::new();
    if cli.human_readable {
        overrides = overrides.with_output_format(OutputFormat::Human);
    }
    if let Some(ref level) = cli.log_level {
        overrides = overrides.with_log_level(level.clone());
    }
    let config = match resolve_config(&paths, &overrides) {
        Ok(config) => config,
        Err(e) => fail(&e, cli.human_readable),
    };
    let human = config.output_format() == OutputFormat::Human;

    let log_dir = config.log_file.value.then(|| paths.data_dir().to_path_buf());
    let _log_guard = tsubame::logging::init(&config.log_level.value, log_dir.as_deref());

    if let Err(e) = run_command(cli.command, paths, config, human) {
        tracing::debug!("command failed: {}", e);
        fail(&e, human);
    }
}

fn fail(error: &tsubame::Error, human: bool) -> ! {
    if human {
        eprintln!("Error: {}", error);
    } else {
        eprintln!("{}", serde_json::json!({ "error": error.to_string() }));
    }
    process::exit(1);
}

fn run_command(
    command: Option<Commands>,
    paths: ConfigPaths,
    config: ResolvedConfig,
    human: bool,
) -> Result<(), tsubame::Error> {
    // Commands that only read or write the KDL files.
    match command {
        Some(Commands::Account { command }) => {
            match command {
                AccountCommands::Add {
                    username,
                    token,
                    api_base,
                } => output(&commands::account_add(&paths, &username, &token, api_base)?, human),
                AccountCommands::List => output(&commands::account_list(&paths)?, human),
                AccountCommands::Remove { username } => {
                    output(&commands::account_remove(&paths, &username)?, human)
                }
            }
            return Ok(());
        }
        Some(Commands::Config { command }) => {
            match command {
                ConfigCommands::Show => output(&commands::config_show(&paths, &config), human),
                ConfigCommands::Set { key, value } => {
                    output(&commands::config_set(&paths, &key, &value)?, human)
                }
            }
            return Ok(());
        }
        _ => {}
    }

    let session = Session::open(paths, config)?;
    match command {
        None => output(&commands::status(&session)?, human),

        Some(Commands::Init) => output(&commands::init(&session)?, human),

        Some(Commands::Stream { command }) => match command {
            StreamCommands::List => output(&commands::stream_list(&session)?, human),
            StreamCommands::Show { name, limit } => {
                output(&commands::stream_show(&session, &name, limit)?, human)
            }
            StreamCommands::Create { name, description } => {
                output(&commands::stream_create(&session, &name, &description)?, human)
            }
            StreamCommands::Delete { name, purge } => {
                output(&commands::stream_delete(&session, &name, purge)?, human)
            }
            StreamCommands::Refresh { name } => {
                output(&commands::stream_refresh(&session, name.as_deref())?, human)
            }
            StreamCommands::Rename { name, new_name } => {
                output(&commands::stream_rename(&session, &name, &new_name)?, human)
            }
            StreamCommands::Move { name, index } => {
                output(&commands::stream_move(&session, &name, index)?, human)
            }
        },

        Some(Commands::Source { command }) => match command {
            SourceCommands::Add {
                stream,
                kind,
                target,
                account,
                cache,
                disabled,
            } => {
                let options = SourceOptions {
                    kind,
                    target,
                    account,
                    cache,
                    disabled,
                };
                output(&commands::source_add(&session, &stream, options)?, human)
            }
            SourceCommands::List { stream } => {
                output(&commands::source_list(&session, &stream)?, human)
            }
            SourceCommands::Remove { stream, index } => {
                output(&commands::source_remove(&session, &stream, index)?, human)
            }
            SourceCommands::Toggle {
                stream,
                index,
                enabled,
            } => output(
                &commands::source_toggle(&session, &stream, index, enabled)?,
                human,
            ),
        },

        Some(Commands::Filter { command }) => match command {
            FilterCommands::Add {
                stream,
                kind,
                target,
                remote,
                account,
                negative,
                name,
            } => {
                let options = FilterOptions {
                    kind,
                    target,
                    remote,
                    account,
                    negative,
                    name,
                };
                output(&commands::filter_add(&session, &stream, options)?, human)
            }
            FilterCommands::List { stream } => {
                output(&commands::filter_list(&session, &stream)?, human)
            }
            FilterCommands::Remove { stream, index } => {
                output(&commands::filter_remove(&session, &stream, index)?, human)
            }
        },

        Some(Commands::List { command }) => match command {
            ListCommands::Create {
                name,
                users,
                description,
            } => output(
                &commands::list_create(&session, &name, &users, &description)?,
                human,
            ),
            ListCommands::Show => output(&commands::list_show(&session)?, human),
            ListCommands::Add { name, user } => {
                output(&commands::list_add(&session, &name, &user)?, human)
            }
            ListCommands::Remove { name, user } => {
                output(&commands::list_remove(&session, &name, &user)?, human)
            }
        },

        // handled above
        Some(Commands::Account { .. }) | Some(Commands::Config { .. }) => {}
    }
    Ok(())
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
