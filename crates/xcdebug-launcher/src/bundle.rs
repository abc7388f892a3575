//! Patching of built bundles, so that sandboxed or hardened applications
//! load their shared libraries from within the bundle.

use std::path::{Component, Path, PathBuf};

use goblin::mach::{Mach, MachO, SingleArch};

use crate::settings::AppTarget;
use crate::tools::ToolRunner;

/// Runtime search path of the libraries linked into the bundle.
const FRAMEWORKS_RPATH: &str = "@executable_path/../Frameworks";

/// Subdirectory of the products directory where package dependencies are
/// built.
const PACKAGE_FRAMEWORKS: &str = "PackageFrameworks";

/// Links the libraries of the products directory into the bundle, rewrites
/// the executable's load commands accordingly, and re-signs the bundle.
#[tracing::instrument(name = "Patch", skip_all, fields(bundle = %target.bundle_path.display()))]
pub(crate) async fn patch<T: ToolRunner>(
    tools: &T,
    target: &AppTarget,
    identity: Option<&str>,
) -> crate::Result<()> {
    let libraries = shared_libraries(&target.products_dir).await?;
    let linked = link_libraries(&target.frameworks_dir, &libraries).await?;

    let executable = tokio::fs::read(&target.executable_path)
        .await
        .map_err(|e| patch_failure(&target.executable_path, e))?;
    let commands = LoadCommands::parse(&executable)?;

    let mut args = install_name_args(&commands, &target.products_dir);
    if !args.is_empty() {
        args.push(target.executable_path.display().to_string());

        tools
            .run("install_name_tool", &args)
            .await?
            .checked("install_name_tool")?;
    }

    resign(tools, &target.bundle_path, identity).await?;

    tracing::info!(linked, rewritten = !args.is_empty(), "bundle patched");

    Ok(())
}

/// Returns the shared libraries and frameworks of a products directory.
async fn shared_libraries(products_dir: &Path) -> crate::Result<Vec<PathBuf>> {
    let mut libraries = Vec::new();

    for dir in [products_dir.to_owned(), products_dir.join(PACKAGE_FRAMEWORKS)] {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(patch_failure(&dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| patch_failure(&dir, e))?
        {
            let path = entry.path();
            if matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("dylib" | "framework")
            ) {
                libraries.push(path);
            }
        }
    }

    libraries.sort();
    Ok(libraries)
}

/// Symlinks the given libraries into `frameworks_dir`, unless the bundle
/// already embeds a library of the same name.
///
/// Returns the number of created links.
async fn link_libraries(frameworks_dir: &Path, libraries: &[PathBuf]) -> crate::Result<usize> {
    tokio::fs::create_dir_all(frameworks_dir)
        .await
        .map_err(|e| patch_failure(frameworks_dir, e))?;

    let mut linked = 0;

    for library in libraries {
        let Some(name) = library.file_name() else {
            continue;
        };

        let link = frameworks_dir.join(name);
        if tokio::fs::symlink_metadata(&link).await.is_ok() {
            continue;
        }

        tokio::fs::symlink(library, &link)
            .await
            .map_err(|e| patch_failure(&link, e))?;

        tracing::debug!(library = %library.display(), "linked into bundle");
        linked += 1;
    }

    Ok(linked)
}

/// Load commands of a Mach-O executable (every architecture of a universal
/// binary combined).
#[derive(Debug, Default, PartialEq, Eq)]
struct LoadCommands {
    rpaths: Vec<String>,
    libs: Vec<String>,
}

impl LoadCommands {
    fn parse(bytes: &[u8]) -> crate::Result<Self> {
        let mut commands = Self::default();

        match Mach::parse(bytes).map_err(invalid_executable)? {
            Mach::Binary(macho) => commands.extend(&macho),
            Mach::Fat(fat) => {
                for index in 0..fat.narches {
                    if let SingleArch::MachO(macho) = fat.get(index).map_err(invalid_executable)? {
                        commands.extend(&macho);
                    }
                }
            }
        }

        Ok(commands)
    }

    fn extend(&mut self, macho: &MachO<'_>) {
        for rpath in &macho.rpaths {
            if !self.rpaths.iter().any(|known| known == rpath) {
                self.rpaths.push((*rpath).to_owned());
            }
        }

        // the first entry stands for the binary itself
        for lib in macho.libs.iter().filter(|lib| lib.starts_with('/')) {
            if !self.libs.iter().any(|known| known == lib) {
                self.libs.push((*lib).to_owned());
            }
        }
    }
}

/// Returns the `install_name_tool` arguments which make the executable
/// load the libraries of `products_dir` from the bundle.
fn install_name_args(commands: &LoadCommands, products_dir: &Path) -> Vec<String> {
    let mut args = Vec::new();

    let mut has_frameworks_rpath = commands
        .rpaths
        .iter()
        .any(|rpath| rpath == FRAMEWORKS_RPATH);

    // search paths outside the products directory are left alone
    for rpath in commands
        .rpaths
        .iter()
        .filter(|rpath| Path::new(rpath).starts_with(products_dir))
    {
        if has_frameworks_rpath {
            args.extend(["-delete_rpath".to_owned(), rpath.clone()]);
        } else {
            args.extend([
                "-rpath".to_owned(),
                rpath.clone(),
                FRAMEWORKS_RPATH.to_owned(),
            ]);
            has_frameworks_rpath = true;
        }
    }

    let mut changed = false;

    for lib in &commands.libs {
        let Ok(relative) = Path::new(lib).strip_prefix(products_dir) else {
            continue;
        };

        args.extend([
            "-change".to_owned(),
            lib.clone(),
            format!("@rpath/{}", linked_name(relative).display()),
        ]);
        changed = true;
    }

    if changed && !has_frameworks_rpath {
        args.extend(["-add_rpath".to_owned(), FRAMEWORKS_RPATH.to_owned()]);
    }

    args
}

/// Path of a library relative to the bundle's frameworks directory,
/// given its path relative to the products directory.
fn linked_name(relative: &Path) -> PathBuf {
    let mut components = relative.components();

    while let Some(component) = components.next() {
        if let Component::Normal(name) = component {
            if Path::new(name).extension().is_some_and(|ext| ext == "framework") {
                return Path::new(name).join(components.as_path());
            }
        }
    }

    relative
        .file_name()
        .map_or_else(|| relative.to_owned(), PathBuf::from)
}

/// Re-signs the bundle with its original identity and entitlements.
async fn resign<T: ToolRunner>(
    tools: &T,
    bundle: &Path,
    identity: Option<&str>,
) -> crate::Result<()> {
    let bundle = bundle.display().to_string();

    let info = tools
        .run(
            "codesign",
            &["-d".to_owned(), "--verbose=2".to_owned(), bundle.clone()],
        )
        .await?;
    let signed = info.succeeded() || !info.stderr.contains("not signed");
    let info = if signed { info.checked("codesign")? } else { info };

    let identity = match identity {
        Some(identity) => identity.to_owned(),
        None => signing_identity(&format!("{}\n{}", info.stdout, info.stderr)),
    };

    let entitlements = if signed {
        let output = tools
            .run(
                "codesign",
                &[
                    "-d".to_owned(),
                    "--entitlements".to_owned(),
                    "-".to_owned(),
                    "--xml".to_owned(),
                    bundle.clone(),
                ],
            )
            .await?
            .checked("codesign")?;
        entitlements_plist(&output.stdout).map(str::to_owned)
    } else {
        None
    };

    let mut args = vec!["--force".to_owned(), "--sign".to_owned(), identity];

    // kept alive until codesign read it
    let entitlements_file = match entitlements {
        Some(plist) => {
            let file = tempfile::Builder::new()
                .prefix("xcdebug-entitlements")
                .suffix(".plist")
                .tempfile()
                .map_err(|e| patch_failure(Path::new("entitlements"), e))?;
            tokio::fs::write(file.path(), plist)
                .await
                .map_err(|e| patch_failure(file.path(), e))?;

            args.push("--entitlements".to_owned());
            args.push(file.path().display().to_string());
            Some(file)
        }
        None => None,
    };

    args.push(bundle);
    tools.run("codesign", &args).await?.checked("codesign")?;

    drop(entitlements_file);
    Ok(())
}

/// Extracts the signing identity from `codesign -d --verbose=2`, the
/// ad-hoc identity (`-`) if there is none.
fn signing_identity(info: &str) -> String {
    info.lines()
        .find_map(|line| line.trim().strip_prefix("Authority="))
        .map_or_else(|| "-".to_owned(), |authority| authority.trim().to_owned())
}

fn entitlements_plist(output: &str) -> Option<&str> {
    let start = output.find("<?xml").or_else(|| output.find("<plist"))?;
    let plist = output[start..].trim();
    plist.contains("<dict>").then_some(plist)
}

fn patch_failure(path: &Path, e: std::io::Error) -> crate::Error {
    crate::Error::LaunchFailure(format!("cannot patch {}: {e}", path.display()))
}

fn invalid_executable(e: goblin::error::Error) -> crate::Error {
    crate::Error::LaunchFailure(format!("cannot read executable load commands: {e}"))
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use indoc::indoc;

    use super::*;
    use crate::tools::ToolOutput;

    const LC_LOAD_DYLIB: u32 = 0xc;
    const LC_RPATH: u32 = 0x8000_001c;

    fn load_command(cmd: u32, fields: &[u32], string: &str) -> Vec<u8> {
        let offset = 12 + 4 * fields.len();
        let size = (offset + string.len() + 1).next_multiple_of(8);

        let mut bytes = Vec::with_capacity(size);
        for word in [cmd, size as u32, offset as u32].iter().chain(fields) {
            bytes.extend(word.to_le_bytes());
        }
        bytes.extend(string.as_bytes());
        bytes.resize(size, 0);
        bytes
    }

    /// Minimal arm64 Mach-O executable with the given load commands.
    fn executable(rpaths: &[&str], libs: &[&str]) -> Vec<u8> {
        let commands: Vec<u8> = rpaths
            .iter()
            .map(|rpath| load_command(LC_RPATH, &[], rpath))
            .chain(
                libs.iter()
                    .map(|lib| load_command(LC_LOAD_DYLIB, &[2, 0x10000, 0x10000], lib)),
            )
            .flatten()
            .collect();

        let header = [
            0xfeed_facf,
            0x0100_000c,
            0,
            2,
            (rpaths.len() + libs.len()) as u32,
            commands.len() as u32,
            0,
            0,
        ];

        header
            .iter()
            .flat_map(|word: &u32| word.to_le_bytes())
            .chain(commands)
            .collect()
    }

    #[derive(Default)]
    struct RecordingTools {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingTools {
        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().expect("lock").clone()
        }
    }

    impl ToolRunner for RecordingTools {
        async fn run(&self, tool: &str, args: &[String]) -> crate::Result<ToolOutput> {
            let mut call = vec![tool.to_owned()];
            call.extend_from_slice(args);
            self.calls.lock().expect("lock").push(call);

            Ok(match args {
                [flag, verbose, _] if flag == "-d" && verbose == "--verbose=2" => ToolOutput {
                    code: Some(0),
                    stdout: String::new(),
                    stderr: indoc! {"
                        Executable=/tmp/App.app/Contents/MacOS/App
                        Identifier=com.example.App
                        Authority=Apple Development: Jane Appleseed (AB12CD34EF)
                        Authority=Apple Worldwide Developer Relations Certification Authority
                    "}
                    .to_owned(),
                },
                [flag, entitlements, ..] if flag == "-d" && entitlements == "--entitlements" => {
                    let plist = indoc! {r#"
                        <?xml version="1.0" encoding="UTF-8"?>
                        <plist version="1.0"><dict><key>com.apple.security.app-sandbox</key><true/></dict></plist>
                    "#};
                    ToolOutput::success(plist)
                }
                _ => ToolOutput::success(""),
            })
        }
    }

    #[test]
    fn load_commands_of_executable() {
        let bytes = executable(
            &["/tmp/Products/Debug", "@executable_path/../Frameworks"],
            &["/usr/lib/libSystem.B.dylib", "/tmp/Products/Debug/libHelpers.dylib"],
        );

        let commands = LoadCommands::parse(&bytes).expect("load commands");
        assert_eq!(
            commands.rpaths,
            ["/tmp/Products/Debug", "@executable_path/../Frameworks"]
        );
        assert_eq!(
            commands.libs,
            ["/usr/lib/libSystem.B.dylib", "/tmp/Products/Debug/libHelpers.dylib"]
        );

        assert!(LoadCommands::parse(b"not a binary").is_err());
    }

    #[test]
    fn rewrites_of_products_paths() {
        let products = Path::new("/tmp/Products/Debug");

        let commands = LoadCommands {
            rpaths: vec![
                "/usr/lib/swift".to_owned(),
                "/tmp/Products/Debug".to_owned(),
                "/opt/lib".to_owned(),
                "/tmp/Products/Debug/PackageFrameworks".to_owned(),
            ],
            libs: vec![
                "/usr/lib/libSystem.B.dylib".to_owned(),
                "/tmp/Products/Debug/libHelpers.dylib".to_owned(),
                "/tmp/Products/Debug/PackageFrameworks/Kit.framework/Versions/A/Kit".to_owned(),
            ],
        };
        assert_eq!(
            install_name_args(&commands, products),
            [
                "-rpath",
                "/tmp/Products/Debug",
                "@executable_path/../Frameworks",
                "-delete_rpath",
                "/tmp/Products/Debug/PackageFrameworks",
                "-change",
                "/tmp/Products/Debug/libHelpers.dylib",
                "@rpath/libHelpers.dylib",
                "-change",
                "/tmp/Products/Debug/PackageFrameworks/Kit.framework/Versions/A/Kit",
                "@rpath/Kit.framework/Versions/A/Kit",
            ]
        );

        let commands = LoadCommands {
            rpaths: vec![],
            libs: vec!["/tmp/Products/Debug/libHelpers.dylib".to_owned()],
        };
        assert_eq!(
            install_name_args(&commands, products),
            [
                "-change",
                "/tmp/Products/Debug/libHelpers.dylib",
                "@rpath/libHelpers.dylib",
                "-add_rpath",
                "@executable_path/../Frameworks",
            ]
        );

        let commands = LoadCommands {
            rpaths: vec![
                "@executable_path/../Frameworks".to_owned(),
                "/usr/lib/swift".to_owned(),
            ],
            libs: vec!["/usr/lib/libSystem.B.dylib".to_owned()],
        };
        assert!(install_name_args(&commands, products).is_empty());
    }

    #[test]
    fn identity_and_entitlements() {
        assert_eq!(
            signing_identity("Identifier=App\nAuthority=Developer ID Application: ACME (XYZ)\n"),
            "Developer ID Application: ACME (XYZ)"
        );
        assert_eq!(signing_identity("Identifier=App\nSignature=adhoc\n"), "-");

        assert!(entitlements_plist("").is_none());
        assert!(entitlements_plist("<?xml version=\"1.0\"?><plist></plist>").is_none());
        let output = "Executable=/tmp/App\n<?xml version=\"1.0\"?><plist><dict></dict></plist>";
        assert!(entitlements_plist(output).is_some_and(|plist| plist.starts_with("<?xml")));
    }

    #[tokio::test]
    async fn bundle_is_patched_and_resigned() {
        let dir = tempfile::tempdir().expect("tempdir");
        let products = dir.path().join("Debug");
        let bundle = products.join("App.app");
        let frameworks = bundle.join("Contents/Frameworks");
        let executable_path = bundle.join("Contents/MacOS/App");

        std::fs::create_dir_all(executable_path.parent().expect("parent")).expect("mkdir");
        std::fs::create_dir_all(frameworks.join("Embedded.framework")).expect("mkdir");
        std::fs::create_dir_all(products.join("Embedded.framework")).expect("mkdir");
        std::fs::create_dir_all(products.join("PackageFrameworks/Kit.framework")).expect("mkdir");
        std::fs::write(products.join("libHelpers.dylib"), b"").expect("write");

        let helpers = products.join("libHelpers.dylib").display().to_string();
        let products_rpath = products.display().to_string();
        std::fs::write(
            &executable_path,
            executable(&[&products_rpath], &["/usr/lib/libSystem.B.dylib", &helpers]),
        )
        .expect("write executable");

        let target = AppTarget {
            bundle_path: bundle.clone(),
            bundle_id: "com.example.App".to_owned(),
            executable_name: "App".to_owned(),
            executable_path: executable_path.clone(),
            frameworks_dir: frameworks.clone(),
            products_dir: products.clone(),
            restricted: true,
        };

        let tools = RecordingTools::default();
        patch(&tools, &target, None).await.expect("patch");

        assert!(frameworks.join("libHelpers.dylib").is_symlink());
        assert!(frameworks.join("Kit.framework").is_symlink());
        assert!(!frameworks.join("Embedded.framework").is_symlink());

        let calls = tools.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(
            calls[0],
            [
                "install_name_tool".to_owned(),
                "-rpath".to_owned(),
                products_rpath,
                FRAMEWORKS_RPATH.to_owned(),
                "-change".to_owned(),
                helpers,
                "@rpath/libHelpers.dylib".to_owned(),
                executable_path.display().to_string(),
            ]
        );

        let resign = &calls[3];
        assert_eq!(
            resign[..4],
            [
                "codesign",
                "--force",
                "--sign",
                "Apple Development: Jane Appleseed (AB12CD34EF)"
            ]
        );
        assert_eq!(resign[4], "--entitlements");
        assert_eq!(resign.last(), Some(&bundle.display().to_string()));
    }
}
