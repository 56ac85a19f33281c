use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Run one bounded sync invocation
    Sync,

    /// Show the checkpoint for a source file
    Progress {
        #[arg(long, help = "Source file key to inspect")]
        file: String,

        #[arg(long, help = "Print the checkpoint as JSON instead of a table")]
        json: bool,
    },

    /// List the processed-file history
    History,

    /// Verify the source and state buckets are reachable
    TestConn,
}
