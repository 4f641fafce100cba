//! Process helpers shared by the build stage and both execution modes.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Output};
use std::sync::{Arc, Mutex};
use std::thread;

/// Exit code of a finished process. A process killed by signal N maps to
/// 128 + N, the convention shells and container runtimes use.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => 1,
    }
}

/// Run a command to completion, capturing output. Returns the output and a
/// printable rendering of the command line for error messages.
pub fn run_captured(cmd: &mut Command) -> io::Result<(Output, String)> {
    let rendered = render(cmd);
    tracing::debug!(command = %rendered, "exec");
    let out = cmd.output()?;
    Ok((out, rendered))
}

pub fn render(cmd: &Command) -> String {
    let mut s = cmd.get_program().to_string_lossy().to_string();
    for arg in cmd.get_args() {
        s.push(' ');
        s.push_str(&arg.to_string_lossy());
    }
    s
}

/// Wait for `child` while forwarding its piped stdout and stderr, line by
/// line, into `sink`.
///
/// Both pipes are drained on background threads while the child runs, so a
/// child writing more than a pipe buffer never blocks.
pub fn wait_forwarding<W>(child: &mut Child, sink: Arc<Mutex<W>>) -> io::Result<ExitStatus>
where
    W: Write + Send + 'static,
{
    let mut handles = Vec::new();
    if let Some(out) = child.stdout.take() {
        handles.push(spawn_forwarder(out, Arc::clone(&sink)));
    }
    if let Some(err) = child.stderr.take() {
        handles.push(spawn_forwarder(err, Arc::clone(&sink)));
    }
    let status = child.wait();
    for h in handles {
        let _ = h.join();
    }
    status
}

fn spawn_forwarder<R, W>(reader: R, sink: Arc<Mutex<W>>) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if !line.ends_with(b"\n") {
                        line.push(b'\n');
                    }
                    if let Ok(mut w) = sink.lock() {
                        let _ = w.write_all(&line);
                        let _ = w.flush();
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[test]
    fn exit_codes_pass_through() {
        for code in [0, 1, 7, 99, 255] {
            let status = Command::new("sh")
                .args(["-c", &format!("exit {code}")])
                .status()
                .unwrap();
            assert_eq!(exit_code_of(status), code);
        }
    }

    #[test]
    fn signal_death_maps_to_128_plus_signal() {
        let status = Command::new("sh").args(["-c", "kill -TERM $$"]).status().unwrap();
        assert_eq!(exit_code_of(status), 128 + 15);
    }

    #[test]
    fn forwarding_collects_both_streams_line_by_line() {
        let mut child = Command::new("sh")
            .args(["-c", "echo out; echo err >&2; printf tail"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let sink = Arc::new(Mutex::new(Vec::<u8>::new()));
        let status = wait_forwarding(&mut child, Arc::clone(&sink)).unwrap();
        assert!(status.success());

        let text = String::from_utf8(sink.lock().unwrap().clone()).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines.sort();
        assert_eq!(lines, vec!["err", "out", "tail"]);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn render_joins_program_and_args() {
        let mut cmd = Command::new("/opt/venv/bin/python");
        cmd.args(["-m", "pip", "install"]);
        assert_eq!(render(&cmd), "/opt/venv/bin/python -m pip install");
    }
}
