use derive_more::*;

#[derive(Clone, Copy, Debug, PartialEq, Display)]
#[display(fmt = "crypto error")]
pub struct CryptoError;

impl From<::rand::Error> for CryptoError {
    fn from(_: ::rand::Error) -> CryptoError {
        CryptoError
    }
}
