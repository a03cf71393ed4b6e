//! DNS messages over TCP: two length bytes, then the message.
use std::io::ErrorKind;

use hickory_resolver::proto::op::{Message, MessageType, OpCode, Query};
use hickory_resolver::proto::rr::{DNSClass, Name, RecordType};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Builds a single-question query with a random id.
pub fn query(name: Name, rtype: RecordType, class: DNSClass) -> Message {
    let mut question = Query::query(name, rtype);
    question.set_query_class(class);

    let mut msg = Message::new();
    msg.set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(false)
        .add_query(question);
    msg
}

pub async fn write_message<W>(stream: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = msg.to_vec()?;
    let len = u16::try_from(bytes.len()).map_err(|_| {
        Error::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            "DNS message does not fit a TCP frame",
        ))
    })?;

    let mut frame = Vec::with_capacity(bytes.len() + 2);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&bytes);
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one framed message. `None` means the peer closed the connection
/// cleanly before the next frame.
pub async fn read_message<R>(stream: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 2];
    match stream.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let mut buf = vec![0u8; usize::from(u16::from_be_bytes(len))];
    stream.read_exact(&mut buf).await?;
    Ok(Some(Message::from_vec(&buf)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn framing_survives_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let name = Name::from_str("version.bind.").unwrap();
        let sent = query(name.clone(), RecordType::TXT, DNSClass::CH);

        write_message(&mut client, &sent).await.unwrap();
        let got = read_message(&mut server).await.unwrap().unwrap();

        assert_eq!(got.id(), sent.id());
        assert_eq!(got.queries()[0].name(), &name);
        assert_eq!(got.queries()[0].query_class(), DNSClass::CH);
    }

    #[tokio::test]
    async fn clean_eof_is_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_message(&mut server).await.unwrap().is_none());
    }
}
