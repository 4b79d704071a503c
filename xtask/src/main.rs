use xshell::{Cmd, Shell};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sh = &Shell::new()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(|s| &**s).collect();
    match *args {
        ["test"] => {
            cargo(sh).args(["test", "--no-default-features"]).run()?;
            cargo(sh).args(["test", "--features=async"]).run()?;
            cargo(sh).args(["test", "--all-features"]).run()?;
            cargo(sh).args(["clippy", "--all-features", "--all-targets"]).run()?;
            cargo(sh).args(["doc", "--all-features", "--no-deps"]).run()?;
        }
        ["lint"] => {
            cargo(sh).args(["clippy", "--no-default-features"]).run()?;
            cargo(sh).args(["clippy", "--all-features", "--all-targets"]).run()?;
        }
        _ => {
            return Err(format!("invalid arguments: {args:?}; expected `test` or `lint`").into());
        }
    }

    Ok(())
}

fn cargo(sh: &Shell) -> Cmd {
    let cargo = std::env::var("CARGO").unwrap_or_else(|_| String::from("cargo"));
    sh.cmd(cargo)
}
