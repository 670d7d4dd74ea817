//! `stowage fetch`: sync (or restore) one collection and print it.

use std::collections::HashSet;
use std::sync::Arc;

use stowage_config::Config;
use stowage_core::{EventKind, Host, Record, Selector, StorageOp, StorageTarget, Where};

use crate::cli::{FetchArgs, GlobalOpts};
use crate::commands::Session;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: &FetchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let session = Session::open(global, &args.store)?;
    let filter = parse_filters(&args.filters)?;

    let host = Host::decorate(&args.id, Some(session.context.clone()), session.options.clone())?;
    host.on(EventKind::AfterDataRetrieve, |event| {
        tracing::debug!(owner = %event.owner, "nested records retrieved");
    });

    if let Some(backend) = args.restore {
        host.data
            .storage(StorageTarget::Store, StorageOp::Get, backend.into())
            .await?;
        tracing::info!(id = %host.id(), total = host.data.total(), "store restored");
    } else {
        let uri = match args.uri.as_deref() {
            Some(uri) => uri.to_owned(),
            None => Config::profile_uri(&session.profile)?
                .map(|u| u.to_string())
                .ok_or_else(|| CliError::NoUri {
                    profile: session.profile_name.clone(),
                })?,
        };
        host.data.set_uri(&uri).await?;
        tracing::info!(uri = %uri, total = host.data.total(), "collection synced");
    }

    if let Some(backend) = args.save {
        host.data
            .storage(StorageTarget::Store, StorageOp::Set, backend.into())
            .await?;
    }

    let records = query(&host, args, filter.as_ref()).await?;
    output::print_output(
        &output::render_records(&global.output, &records),
        global.quiet,
    );

    host.data.teardown();
    Ok(())
}

/// Apply sort, filter, search and selector in that order.
async fn query(
    host: &Host,
    args: &FetchArgs,
    filter: Option<&Where>,
) -> Result<Vec<Arc<Record>>, CliError> {
    let mut records: Vec<Arc<Record>> = match (args.sort.as_deref(), filter) {
        (Some(sort), filter) => host.data.sort(sort, false, filter).await?.to_vec(),
        (None, Some(filter)) => host.data.select(filter).await?,
        (None, None) => host.data.records().to_vec(),
    };

    if let Some(ref needle) = args.find {
        let hits: HashSet<String> = host
            .data
            .find(needle, None)
            .into_iter()
            .map(|r| r.key.clone())
            .collect();
        records.retain(|r| hits.contains(&r.key));
    }

    if let Some(ref raw) = args.get {
        let wanted: HashSet<String> = host
            .data
            .get(Selector::from(raw.as_str()))
            .into_iter()
            .map(|r| r.key.clone())
            .collect();
        records.retain(|r| wanted.contains(&r.key));
    }

    Ok(records)
}

fn parse_filters(exprs: &[String]) -> Result<Option<Where>, CliError> {
    if exprs.is_empty() {
        return Ok(None);
    }
    let mut filter = Where::new();
    for expr in exprs {
        let (field, clause) = Where::parse_expr(expr)?;
        filter.push(field, clause);
    }
    Ok(Some(filter))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn filters_are_anded_in_order() {
        let filter = parse_filters(&["age>=50".into(), "name~a".into()])
            .unwrap()
            .unwrap();
        let fields: Vec<_> = filter.clauses().iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(fields, ["age", "name"]);
        assert!(parse_filters(&[]).unwrap().is_none());
    }
}
