mod aggregates;
mod archive;
mod detections;
