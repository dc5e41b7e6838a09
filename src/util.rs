use crate::error::{Error, Result};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Directory containing the running executable.
pub fn cwd_from_exe() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    exe.parent().map(Path::to_path_buf).ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("executable path {} has no parent", exe.display()),
        ))
    })
}

pub fn file_exists(path: &Path) -> bool {
    path.metadata().map(|m| !m.is_dir()).unwrap_or(false)
}

pub fn dir_exists(path: &Path) -> bool {
    path.metadata().map(|m| m.is_dir()).unwrap_or(false)
}

/// Whether `cmd` resolves to an executable on `PATH`.
pub fn check_path(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Ask a yes/no question until the answer is one of `y`, `yes`, `n`, `no`.
///
/// Matching is case-insensitive. Reaching end of input is an error since no
/// answer can ever arrive.
pub fn ask_for_confirmation<R, W>(input: &mut R, output: &mut W, prompt: &str) -> Result<bool>
where
    R: BufRead,
    W: Write,
{
    let mut line = String::new();
    loop {
        write!(output, "{prompt} [y/n]: ")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no answer given",
            )));
        }

        match line.trim().to_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => continue,
        }
    }
}
