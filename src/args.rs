use clap::Parser;

/// Replays ballot submissions against an in-memory ballot store.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The scenario to replay: the contest, the rules and the list of submissions, in JSON format.
    /// See the manual of the ballot_ranking crate for the format.
    #[clap(short, long, value_parser)]
    pub config: String,

    /// (file path) A reference file containing the expected summary in JSON format. If provided, ballotrank will
    /// check that the replayed ballots match the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (file path, 'stdout' or empty) Where to write the summary of the replay in JSON format.
    /// Defaults to the standard output.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
