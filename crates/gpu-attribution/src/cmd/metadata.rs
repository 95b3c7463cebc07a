use anyhow::Result;
use gpu_attribution::MetadataExtractor;
use gpu_attribution::ProcEnvironmentReader;

use crate::config::FileConfig;
use crate::config::LookupSettings;
use crate::config::MetadataArgs;

/// Prints the metadata of one process as a JSON object.
pub fn run(file: &FileConfig, args: &MetadataArgs) -> Result<()> {
    let settings = LookupSettings::merge(file, &args.lookup);
    if settings.env_keys.is_empty() {
        tracing::warn!("No environment keys configured, output will be empty");
    }

    let extractor = MetadataExtractor::new(ProcEnvironmentReader::new(&settings.proc_root));
    let metadata = extractor
        .extract_metadata(args.pid, &settings.env_keys)
        .map_err(|e| anyhow::anyhow!("No metadata available for process {}: {e:?}", args.pid))?;

    println!("{}", serde_json::to_string(&metadata)?);
    Ok(())
}
