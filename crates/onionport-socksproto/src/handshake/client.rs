//! Implementation for a SOCKS5 client handshake.

use super::{
    Action, NO_AUTHENTICATION, StepResult, USERNAME_PASSWORD, USERNAME_PASSWORD_VERSION,
    put_socks5_addr, run_step, take_socks5_addr, take_u8, take_u16,
};
use crate::msg::{SocksAuth, SocksReply, SocksRequest, SocksStatus, SocksVersion};
use crate::{Error, Result, TResult};

use bytes::BufMut;

/// The client (initiator) side of a SOCKS5 handshake.
///
/// Create one of these with [`SocksClientHandshake::new()`], and then call
/// [`handshake()`](SocksClientHandshake::handshake) with whatever the proxy
/// has sent so far (initially nothing) until the returned [`Action`] is
/// finished.
#[derive(Clone, Debug)]
pub struct SocksClientHandshake {
    /// The request that we are currently trying to negotiate with the proxy.
    request: SocksRequest,
    /// Our current state in negotiating that request.
    state: State,
    /// If present, the return message that we received from the proxy.
    reply: Option<SocksReply>,
}

/// An internal state for a `SocksClientHandshake`.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
enum State {
    /// We have sent nothing yet.
    Initial,
    /// We have sent our method list, and are waiting to hear what kind
    /// of authentication to use.
    AuthWait,
    /// We have sent a username/password, and are waiting to hear whether
    /// it's accepted.
    UsernameWait,
    /// We have sent the request, and are waiting for a response.
    ReplyWait,
    /// We have received the final reply from the proxy, which may or may
    /// not report success.
    Done,
    /// The handshake has failed and no further progress can be made.
    Failed,
}

impl SocksClientHandshake {
    /// Construct a new [`SocksClientHandshake`] that will attempt to negotiate
    /// with a peer using `request`.
    ///
    /// Only SOCKS5 requests can be sent.
    pub fn new(request: SocksRequest) -> Self {
        SocksClientHandshake {
            request,
            state: State::Initial,
            reply: None,
        }
    }

    /// Try to advance the handshake, given what the proxy has sent in `input`.
    pub fn handshake(&mut self, input: &[u8]) -> TResult<Action> {
        let outcome = run_step(input, |r| match self.state {
            State::Initial => Ok((self.send_initial()?, false)),
            State::AuthWait => Ok((self.handle_auth(r)?, false)),
            State::UsernameWait => Ok((self.handle_username_ack(r)?, false)),
            State::ReplyWait => {
                self.handle_reply(r)?;
                Ok((Vec::new(), true))
            }
            State::Done | State::Failed => Err(Error::AlreadyFinished.into()),
        })?;
        if outcome.is_err() && self.state != State::Done {
            self.state = State::Failed;
        }
        Ok(outcome.map(|(drain, reply, finished)| Action {
            drain,
            reply,
            finished,
        }))
    }

    /// Consume this handshake; return the proxy's reply if we got one.
    pub fn into_reply(self) -> Option<SocksReply> {
        self.reply
    }

    /// Send our version and the methods we can do.
    ///
    /// With credentials we offer only username/password, so that the
    /// proxy cannot silently drop them.
    fn send_initial(&mut self) -> Result<Vec<u8>> {
        if self.request.version() != SocksVersion::V5 {
            return Err(Error::NotImplemented("SOCKS4 client handshake".into()));
        }
        let mut msg = Vec::new();
        msg.put_u8(5);
        match self.request.auth() {
            SocksAuth::NoAuth => {
                msg.put_u8(1);
                msg.put_u8(NO_AUTHENTICATION);
            }
            SocksAuth::Username(_, _) => {
                msg.put_u8(1);
                msg.put_u8(USERNAME_PASSWORD);
            }
            SocksAuth::Socks4(_) => return Err(Error::Bug("Mismatched authentication type")),
        }
        self.state = State::AuthWait;
        Ok(msg)
    }

    /// Handle the proxy's choice of authentication method.
    fn handle_auth(&mut self, r: &mut &[u8]) -> StepResult<Vec<u8>> {
        let ver = take_u8(r)?;
        if ver != 5 {
            return Err(Error::Syntax.into());
        }
        let (msg, next_state) = match take_u8(r)? {
            USERNAME_PASSWORD => (self.username_auth()?, State::UsernameWait),
            NO_AUTHENTICATION => (self.command(), State::ReplyWait),
            other => {
                return Err(
                    Error::NotImplemented(format!("authentication type {}", other).into()).into(),
                );
            }
        };
        self.state = next_state;
        Ok(msg)
    }

    /// Return a message to perform username/password authentication.
    fn username_auth(&self) -> Result<Vec<u8>> {
        let SocksAuth::Username(username, pass) = self.request.auth() else {
            // Can't perform this authentication when it wasn't what we asked for.
            return Err(Error::Syntax);
        };
        let ulen = u8::try_from(username.len()).map_err(|_| Error::Bug("id too long"))?;
        let plen = u8::try_from(pass.len()).map_err(|_| Error::Bug("password too long"))?;
        let mut msg = Vec::new();
        msg.put_u8(USERNAME_PASSWORD_VERSION);
        msg.put_u8(ulen);
        msg.put_slice(username);
        msg.put_u8(plen);
        msg.put_slice(pass);
        Ok(msg)
    }

    /// Handle the proxy's verdict on our credentials.
    fn handle_username_ack(&mut self, r: &mut &[u8]) -> StepResult<Vec<u8>> {
        let ver = take_u8(r)?;
        if ver != USERNAME_PASSWORD_VERSION {
            return Err(Error::Syntax.into());
        }
        if take_u8(r)? != 0 {
            return Err(Error::AuthRejected.into());
        }
        self.state = State::ReplyWait;
        Ok(self.command())
    }

    /// Encode our request.
    fn command(&self) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.put_u8(5);
        msg.put_u8(self.request.command().into());
        msg.put_u8(0); // reserved.
        put_socks5_addr(&mut msg, self.request.addr());
        msg.put_u16(self.request.port());
        msg
    }

    /// Handle the final reply.
    fn handle_reply(&mut self, r: &mut &[u8]) -> StepResult<()> {
        let ver = take_u8(r)?;
        if ver != 5 {
            return Err(Error::Syntax.into());
        }
        let status: SocksStatus = take_u8(r)?.into();
        let _reserved = take_u8(r)?;
        let addr = take_socks5_addr(r)?;
        let port = take_u16(r)?;

        self.state = State::Done;
        self.reply = Some(SocksReply::new(status, addr, port));
        Ok(())
    }
}
