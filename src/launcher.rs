use log::{error, info, warn};
use std::io::Write;
use std::path::Path;

use crate::config::{Control, ServerConfig};
use crate::error::{GatewayError, PrepareReply};
use crate::http::Request;
use crate::params::{DocumentRoot, EnvSource, ParamBuilder, ParamList};
use crate::privilege;
use crate::resolver::HostLookup;
use crate::sys::{Os, Replaced};

/// Runs a gateway entry point in a child process.
pub trait ForkRequest {
    /// Returns `Ok` in the parent once the child is running; a failure
    /// of `child` only surfaces here when it ran in this process.
    fn fork_request(&self, child: &mut dyn FnMut() -> GatewayError) -> Result<(), GatewayError>;
}

/// Runs the entry point in the calling process, which is already the
/// per-request child.
pub struct InPlace;

impl ForkRequest for InPlace {
    fn fork_request(&self, child: &mut dyn FnMut() -> GatewayError) -> Result<(), GatewayError> {
        Err(child())
    }
}

pub struct Launcher<'a, W: Write> {
    pub os: &'a dyn Os,
    pub server: &'a ServerConfig,
    pub env: &'a dyn EnvSource,
    pub lookup: &'a dyn HostLookup,
    pub reply: &'a dyn PrepareReply,
    pub out: W,
}

impl<W: Write> Launcher<'_, W> {
    /// Replaces the process with the script, or writes an error response
    /// to `out` and says why it could not.
    pub fn launch(&mut self, req: &Request, control: &Control) -> Result<Replaced, GatewayError> {
        match self.exec_cgi(req, control) {
            Ok(never) => match never {},
            Err(e) => {
                self.report(req, e.status());
                Err(e)
            }
        }
    }

    fn exec_cgi(&self, req: &Request, control: &Control) -> Result<Replaced, GatewayError> {
        privilege::drop_privileges(self.os, control, req.owner)?;

        let dir = script_dir(&req.path_translated)?;
        self.os.chdir(dir).map_err(|source| {
            error!("failed to change directory to {}: {}", dir.display(), source);
            GatewayError::Chdir { path: dir.display().to_string(), source }
        })?;

        let translator = DocumentRoot::new(control);
        let builder = ParamBuilder {
            server: self.server,
            env: self.env,
            lookup: self.lookup,
            translator: &translator,
        };
        let mut envp = ParamList::new();
        builder.environment(req, control, &mut envp)?;
        let mut argv = ParamList::new();
        builder.arguments(req, &mut argv)?;

        let envp = envp.finish();
        let argv = argv.finish();
        // arguments() always starts with the program to run
        let program = &argv[0];
        info!("exec {} for {} {}", program.to_string_lossy(), req.method, req.url);

        let source = self.os.execve(program, &argv, &envp);
        error!("execve {}: {}", program.to_string_lossy(), source);
        Err(GatewayError::Exec { path: program.to_string_lossy().into_owned(), source })
    }

    /// Writes a bare status response straight to `out`. Best effort.
    fn report(&mut self, req: &Request, status: u16) {
        warn!("error executing script {}", req.path_translated);
        let Some(bytes) = self.reply.prepare_reply(req, status) else {
            return;
        };
        if let Err(e) = self.out.write_all(&bytes).and_then(|_| self.out.flush()) {
            warn!("could not write {} response: {}", status, e);
        }
    }
}

/// Hands the launcher to the fork primitive for one request.
pub fn process_cgi<W: Write>(
    forker: &dyn ForkRequest,
    launcher: &mut Launcher<'_, W>,
    req: &Request,
    control: &Control,
) -> Result<(), GatewayError> {
    forker.fork_request(&mut || match launcher.launch(req, control) {
        Ok(never) => match never {},
        Err(e) => e,
    })
}

fn script_dir(path_translated: &str) -> Result<&Path, GatewayError> {
    match path_translated.rfind('/') {
        Some(0) => Ok(Path::new("/")),
        Some(i) => Ok(Path::new(&path_translated[..i])),
        None => {
            error!("script path {} has no directory component", path_translated);
            Err(GatewayError::NoDirectory(path_translated.to_string()))
        }
    }
}
