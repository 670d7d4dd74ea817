//! `stowage join`: sync two collections side by side and join them.

use stowage_core::Host;

use crate::cli::{GlobalOpts, JoinArgs};
use crate::commands::Session;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: &JoinArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let session = Session::open(global, &args.store)?;

    let left = Host::decorate("left", Some(session.context.clone()), session.options.clone())?;
    let right = Host::decorate("right", Some(session.context.clone()), session.options.clone())?;

    tokio::try_join!(left.data.set_uri(&args.left), right.data.set_uri(&args.right))?;
    tracing::info!(
        left = left.data.total(),
        right = right.data.total(),
        on = %args.on,
        "collections synced"
    );

    let rows = left.data.join(&right.data, &args.on, args.mode.into()).await?;
    output::print_output(
        &output::render_rows(&global.output, &rows, &args.on),
        global.quiet,
    );

    left.data.teardown();
    right.data.teardown();
    Ok(())
}
