//! External provider infrastructure shared by the STT, Translation and TTS
//! adapters.

pub mod google;
