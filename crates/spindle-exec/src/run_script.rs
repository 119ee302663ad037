//! Generated `run.sh`.
//!
//! Container images expect this exact text: `set -e`, an exit trap that
//! opens up permissions on everything in the workspace, then one
//! interpreter line.

pub const RUN_SCRIPT_NAME: &str = "run.sh";

/// Driver script name for analysis jobs.
pub const ANALYSIS_DRIVER_NAME: &str = "run.py";

const PREAMBLE: &str = concat!(
    "\n",
    "set -e # exit on error and use return code of last command as return code of script\n",
    "clean_up () {\n",
    "    ARG=$?\n",
    "    chmod -R 777 * # make sure all files are readable by everyone so that they can be deleted even if owned by docker user\n",
    "    exit $ARG\n",
    "} \n",
    "trap clean_up EXIT\n",
);

/// Run script for a plain script job.
pub fn plain_run_script(interpreter: &str, script_file_name: &str) -> String {
    format!("{PREAMBLE}{interpreter} {script_file_name}\n")
}

fn driver_line(interpreter: &str, prefix: Option<&str>) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{p} {interpreter} {ANALYSIS_DRIVER_NAME}\n"),
        _ => format!("{interpreter} {ANALYSIS_DRIVER_NAME}\n"),
    }
}

/// Run script for an analysis job; `NBA_FILE_NAME` names the manifest.
pub fn analysis_run_script(interpreter: &str, manifest_file_name: &str, prefix: Option<&str>) -> String {
    format!(
        "{PREAMBLE}export NBA_FILE_NAME=\"{manifest_file_name}\"\n{}",
        driver_line(interpreter, prefix)
    )
}

/// Run script for a sorting tool job; `INPUT_NWB_URL` locates the recording.
pub fn tool_run_script(interpreter: &str, recording_url: &str, prefix: Option<&str>) -> String {
    format!(
        "{PREAMBLE}export INPUT_NWB_URL=\"{recording_url}\"\n{}",
        driver_line(interpreter, prefix)
    )
}
