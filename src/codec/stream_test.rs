use ffmpeg_next::{Rational, codec::Parameters};
use svc_bus::types::StreamDescriptor;

use super::VideoStream;

fn stream(parameters: Parameters) -> VideoStream {
    VideoStream {
        parameters,
        descriptor: StreamDescriptor {
            index: 3,
            width: 640,
            height: 360,
            time_base: (1, 90_000),
            frame_rate: (25, 1),
        },
    }
}

#[test]
fn test_packet_time_base_from_descriptor() {
    let stream = stream(Parameters::new());
    assert_eq!(stream.index(), 3);
    assert_eq!(stream.packet_time_base(), Rational::new(1, 90_000));
    assert_eq!(stream.descriptor().width, 640);
}

#[test]
fn test_open_decoder_rejects_non_video() {
    // freshly allocated parameters carry no medium
    let err = stream(Parameters::new()).open_decoder().unwrap_err();
    assert!(err.to_string().contains("not a video stream"));
}
