#[cfg(test)]
mod tests {
    use avpipe::av::{CodecFlags, Frame, Packet, Rational, StreamDefinition, VideoFrame};
    use avpipe::codec::testing::{MockDecoder, MockEncoder};
    use avpipe::codec::{Decoder, EncodedStream, Encoder};
    use avpipe::filter::testing::PassthroughGraph;
    use avpipe::filter::{Filter, FilterOptions};
    use avpipe::format::testing::{MemoryInput, MemoryOutput, OutputEvent};
    use avpipe::format::{Demuxer, Discarder, Muxer};
    use avpipe::{AvError, Result};
    use tokio_test::{assert_err, assert_ok};

    const FRAMES: i64 = 30;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn source_streams() -> Vec<StreamDefinition> {
        vec![
            StreamDefinition::video("h264", 64, 48, "yuv420p").with_time_base(Rational::new(1, 25)),
            StreamDefinition::audio("aac", 48000, "fltp", "stereo")
                .with_time_base(Rational::new(1, 48000)),
            StreamDefinition::data("bin_data"),
        ]
    }

    fn interleaved(frames: i64) -> Vec<Packet> {
        (0..frames)
            .flat_map(|i| {
                vec![
                    Packet::new(vec![i as u8; 8])
                        .with_stream_index(0)
                        .with_pts(i)
                        .with_key_flag(i % 10 == 0),
                    Packet::new(vec![i as u8; 4])
                        .with_stream_index(1)
                        .with_pts(i * 1024),
                    Packet::new(vec![0u8; 2]).with_stream_index(2).with_pts(i),
                ]
            })
            .collect()
    }

    fn pts_of(packets: &[Packet], index: usize) -> Vec<i64> {
        packets
            .iter()
            .filter(|p| p.stream_index == index)
            .filter_map(|p| p.pts)
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transcode_video_and_copy_audio() -> Result<()> {
        init_logging();

        let input = MemoryInput::new(source_streams())
            .with_locator("memory://camera")
            .with_packets(interleaved(FRAMES));
        let mut demuxer = Demuxer::open(input).await?;
        let video_index = demuxer.video_indices()[0];
        let audio_index = demuxer.audio_indices()[0];
        let video_definition = demuxer.definitions()[video_index].clone();
        let audio_definition = demuxer.definitions()[audio_index].clone();
        let mut video = demuxer.take_stream(video_index).unwrap();
        let mut audio = demuxer.take_stream(audio_index).unwrap();
        let data = Discarder::spawn(demuxer.take_stream(2).unwrap().into_stream());

        let mut decoder = Decoder::open(MockDecoder::new(video_definition)).await?;

        let raw = StreamDefinition::video("rawvideo", 64, 48, "yuv420p")
            .with_time_base(Rational::new(1, 25));
        let options = FilterOptions::new("[in] hflip [out]", Rational::new(1, 25))
            .input("in", raw.clone())
            .output("out", raw);
        let mut filter = Filter::new(PassthroughGraph::new().route("in", "out"), options).await?;
        let mut source = filter.take_source("in").unwrap();
        let mut sink = filter.take_sink("out").unwrap();

        let encoder_engine = MockEncoder::new().with_delay(2);
        let opened_flags = encoder_engine.opened_flags();
        let mut encoder = Encoder::new(
            encoder_engine,
            StreamDefinition::video("libx264", 64, 48, "yuv420p"),
        )?;

        let output = MemoryOutput::new().with_global_header();
        let log = output.log();
        let mut muxer = Muxer::new(
            output,
            vec![encoder.output(), EncodedStream::from_definition(audio_definition)],
        )?;
        let mut video_out = muxer.take_input(0).unwrap();
        let mut audio_out = muxer.take_input(1).unwrap();

        let decode = tokio::spawn(async move {
            while let Some(packet) = video.recv().await {
                if let Some(frame) = decoder.decode(packet?).await? {
                    source.write(frame).await?;
                }
            }
            source.end().await
        });
        let encode = tokio::spawn(async move {
            while let Some(frame) = sink.recv().await {
                video_out.write(encoder.encode(frame?).await?).await?;
            }
            for packet in encoder.finish().await? {
                video_out.write(packet).await?;
            }
            video_out.end().await
        });
        let copy = tokio::spawn(async move {
            while let Some(packet) = audio.recv().await {
                audio_out.write(packet?).await?;
            }
            audio_out.end().await
        });

        assert_ok!(decode.await.unwrap());
        assert_ok!(encode.await.unwrap());
        assert_ok!(copy.await.unwrap());
        assert_eq!(data.await.unwrap()?, FRAMES as usize);
        assert_ok!(muxer.closed().await);
        assert_ok!(filter.closed().await);
        assert_ok!(demuxer.closed().await);

        let flags = opened_flags.lock().unwrap_or_default();
        assert!(flags.contains(CodecFlags::GLOBAL_HEADER));

        let events = log.events();
        println!("sink received {} events", events.len());
        assert!(matches!(events[0], OutputEvent::AddStream(ref d) if d.codec == "libx264"));
        assert!(matches!(events[1], OutputEvent::AddStream(ref d) if d.codec == "aac"));
        assert_eq!(events[2..5], [OutputEvent::Open, OutputEvent::Header, OutputEvent::Flush]);
        assert_eq!(events[events.len() - 2..], [OutputEvent::Trailer, OutputEvent::Close]);

        let packets = log.packets();
        assert_eq!(pts_of(&packets, 0), (0..FRAMES).collect::<Vec<_>>());
        assert_eq!(
            pts_of(&packets, 1),
            (0..FRAMES).map(|i| i * 1024).collect::<Vec<_>>()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_input_failure_tears_down_the_pipeline() -> Result<()> {
        init_logging();

        let broken = AvError::Engine("truncated file".into());
        let input = MemoryInput::new(source_streams()[..1].to_vec())
            .with_packets((0..5).map(|pts| Packet::new(vec![1u8]).with_pts(pts)))
            .with_error(broken.clone());
        let mut demuxer = Demuxer::open(input).await?;
        let mut packets = demuxer.take_stream(0).unwrap();

        let output = MemoryOutput::new();
        let log = output.log();
        let muxer = Muxer::new(
            output,
            vec![EncodedStream::from_definition(demuxer.definitions()[0].clone())],
        )?;
        let mut sink = muxer.into_inputs().pop().unwrap();
        let outcome = sink.completion();

        let mut copied = 0;
        let failure = loop {
            match packets.recv().await {
                Some(Ok(packet)) => {
                    sink.write(packet).await?;
                    copied += 1;
                }
                Some(Err(e)) => break e,
                None => panic!("input ended without its error"),
            }
        };
        assert_eq!(failure, broken);
        assert!(copied <= 5);
        sink.abort(failure);

        assert_eq!(assert_err!(outcome.wait().await), broken);
        assert_eq!(assert_err!(demuxer.closed().await), broken);
        assert!(!log.contains(&OutputEvent::Trailer));
        assert_eq!(log.events().last(), Some(&OutputEvent::Close));
        Ok(())
    }

    #[tokio::test]
    async fn test_muxer_abort_cancels_encoders() -> Result<()> {
        init_logging();

        let mut encoder = Encoder::new(
            MockEncoder::new(),
            StreamDefinition::video("libx264", 64, 48, "yuv420p"),
        )?;
        let muxer = Muxer::new(MemoryOutput::new(), vec![encoder.output()])?;
        muxer.abort();
        assert_eq!(muxer.closed().await, Err(AvError::Cancelled));

        let frame: Frame = VideoFrame::new(64, 48, vec![0u8; 4]).with_pts(0).into();
        assert_eq!(encoder.encode(frame).await, Err(AvError::Cancelled));
        for input in muxer.into_inputs() {
            input.abort(AvError::Cancelled);
        }
        Ok(())
    }
}
