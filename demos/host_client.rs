//! Host client for a bridge serving a Unix socket.
//!
//! Opens one channel, initializes it, evaluates each script given on the
//! command line and asks for shutdown, printing every reply.
//!
//! ```sh
//! scriptport --socket /tmp/scriptport.sock &
//! cargo run --example host_client -- /tmp/scriptport.sock "1 + 1" "throw new Error('x')"
//! ```

use std::path::PathBuf;

use bytes::Bytes;
use clap::Parser;
use scriptport::codec::{ResponseEncoder, ResponseEncoding};
use scriptport::protocol::{build_packet, Command, EvalRequest, Response};

#[derive(Parser, Debug)]
#[command(name = "host_client")]
struct Args {
    /// Socket the bridge listens on
    socket: PathBuf,

    /// Scripts to evaluate, in order
    #[arg(default_value = "1 + 1")]
    scripts: Vec<String>,

    /// Heap limit requested at init, in megabytes
    #[arg(long, default_value_t = 16)]
    heap_mb: i32,

    /// Reply encoding the bridge was started with
    #[arg(long, default_value_t = ResponseEncoding::Etf)]
    encoding: ResponseEncoding,
}

#[cfg(unix)]
#[tokio::main]
async fn main() -> scriptport::Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    let args = Args::parse();
    let encoder = ResponseEncoder::new(args.encoding);
    let mut stream = UnixStream::connect(&args.socket).await?;

    let mut commands = vec![Command::Init {
        call_id: Bytes::from_static(b"init"),
        stack_mb: 8,
        heap_mb: args.heap_mb,
    }];
    for (i, code) in args.scripts.iter().enumerate() {
        commands.push(Command::EvalWithResult(EvalRequest {
            call_id: Bytes::from(format!("eval-{}", i)),
            source_name: format!("script-{}.js", i),
            code: code.clone(),
        }));
    }
    commands.push(Command::Shutdown {
        call_id: Bytes::from_static(b"shutdown"),
    });

    for command in &commands {
        stream.write_all(&build_packet(&command.encode())).await?;

        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await?;
        let mut payload = vec![0u8; u32::from_be_bytes(header) as usize];
        stream.read_exact(&mut payload).await?;

        print_reply(&encoder.decode(&payload)?);
    }

    Ok(())
}

fn print_reply(response: &Response) {
    let call_id = String::from_utf8_lossy(response.call_id());
    match response {
        Response::Ok(_) => println!("{} -> ok", call_id),
        Response::OkValue(_, value) => println!("{} -> ok {}", call_id, value),
        Response::Error(_, message) => println!("{} -> error {}", call_id, message),
        Response::UnknownCommand(_) => println!("{} -> error unknown_command", call_id),
    }
}

#[cfg(not(unix))]
fn main() {
    let _ = Args::parse();
    eprintln!("host_client needs a Unix platform");
}
